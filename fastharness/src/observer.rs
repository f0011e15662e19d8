//! Per-step hooks.
//!
//! Observers see every directive together with the runtime event it came
//! from. They run inline with orchestration but can never affect it: errors
//! and panics are caught, logged and dropped.

use crate::errors::{HarnessError, HarnessResult};
use crate::runtime::{StepEvent, StepKind};
use crate::translator::Directive;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

const PREVIEW_CHARS: usize = 100;

#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step(&self, event: &StepEvent, directive: &Directive) -> HarnessResult<()>;
}

/// Logs tool calls, assistant text previews and turn costs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleStepObserver;

#[async_trait]
impl StepObserver for ConsoleStepObserver {
    async fn on_step(&self, event: &StepEvent, directive: &Directive) -> HarnessResult<()> {
        match (&event.kind, directive) {
            (StepKind::ToolCall { id, name, .. }, _) => {
                info!(turn = event.turn, tool = %name, tool_use_id = %id, "Tool call");
            }
            (StepKind::ToolResult { tool_use_id, is_error, .. }, _) => {
                info!(turn = event.turn, tool_use_id = %tool_use_id, is_error, "Tool result");
            }
            (StepKind::AssistantMessage { text, partial: false }, _) => {
                info!(turn = event.turn, preview = %preview(text), "Assistant message");
            }
            (StepKind::TurnComplete { usage, .. }, Directive::UpdateStatus { state, .. }) => {
                info!(
                    turn = event.turn,
                    state = %state,
                    cost_usd = usage.total_cost_usd.unwrap_or_default(),
                    num_turns = usage.num_turns,
                    "Turn complete"
                );
            }
            _ => {}
        }
        Ok(())
    }
}

/// First `PREVIEW_CHARS` characters, with an ellipsis when cut.
fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Await a hook, converting an error or panic into a log line.
///
/// Returns whether the hook completed successfully.
pub(crate) async fn run_isolated<F>(hook: &'static str, task_id: &str, call: F) -> bool
where
    F: Future<Output = HarnessResult<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(hook, task_id = %task_id, error = %err, "Hook failed; continuing");
            false
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let err = HarnessError::Internal {
                component: hook.to_string(),
                reason,
            };
            warn!(hook, task_id = %task_id, error = %err, "Hook panicked; continuing");
            false
        }
    }
}
