//! Agent runtime abstraction.
//!
//! The language-model execution engine is an external capability. The
//! harness only needs two things from it: a way to open a client bound to
//! one conversation, and, on that client, a call that turns a prompt plus
//! prior exchanges into a finite stream of [`StepEvent`]s.

mod event;
mod options;

pub use event::{StepEvent, StepKind, TurnUsage};
pub use options::{AgentOptions, McpServerConfig, PermissionMode, DEFAULT_MODEL};

use crate::errors::HarnessResult;
use crate::session::Exchange;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Event stream of one run. Finite and not restartable.
pub type StepStream = BoxStream<'static, HarnessResult<StepEvent>>;

/// Everything the runtime needs for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: String,
    pub prompt: String,
    /// Prior successful exchanges of this conversation, oldest first.
    pub history: Vec<Exchange>,
    pub options: AgentOptions,
    /// Fires when the task is canceled; runtimes should stop at their next
    /// suspension point.
    pub cancel: CancellationToken,
}

/// A runtime connection owned by exactly one conversation session.
#[async_trait]
pub trait RuntimeClient: Send {
    async fn run(&mut self, request: RunRequest) -> HarnessResult<StepStream>;

    /// Release runtime-side resources. Called once, on eviction or shutdown.
    async fn close(&mut self) -> HarnessResult<()>;
}

/// Factory for runtime clients.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn connect(
        &self,
        conversation_key: &str,
        options: &AgentOptions,
    ) -> HarnessResult<Box<dyn RuntimeClient>>;
}
