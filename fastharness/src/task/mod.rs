//! Task lifecycle, persistence and fan-out.
//!
//! [`TaskStateMachine`] owns the legal state changes of one task and turns
//! translator directives into protocol events. Events are persisted through
//! a [`TaskStore`] and pushed to live subscribers by the [`TaskEventBus`].

mod event_bus;
mod state_machine;
pub mod status_mapper;
mod store;

pub use event_bus::{TaskEventBus, TaskEventReceiver};
pub use state_machine::{ErrorDetail, TaskStateMachine};
pub use store::{InMemoryTaskStore, TaskStore};

use a2a_types::{Message, TaskArtifactUpdateEvent, TaskStatusUpdateEvent};

/// A significant change in a task's lifecycle, as streamed to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
    Message(Message),
}

impl TaskEvent {
    /// The task the event belongs to. Messages not bound to a task have none.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::StatusUpdate(update) => Some(&update.task_id),
            Self::ArtifactUpdate(update) => Some(&update.task_id),
            Self::Message(message) => message.task_id.as_deref(),
        }
    }

    /// True for the status event that closes the current interaction.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::StatusUpdate(update) if update.is_final)
    }
}
