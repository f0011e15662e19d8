//! Per-task fan-out for task events.
//!
//! Any number of subscribers (streaming clients, tests) can follow a task
//! while the [`TaskStore`](super::TaskStore) stays the source of truth.

use super::TaskEvent;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Receiver for one task's event stream.
pub type TaskEventReceiver = UnboundedReceiver<TaskEvent>;

#[derive(Default)]
struct Subscribers {
    senders: Vec<UnboundedSender<TaskEvent>>,
}

impl Subscribers {
    fn broadcast(&mut self, event: &TaskEvent) {
        self.senders
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Multiplexes [`TaskEvent`]s to subscribers per task.
#[derive(Default)]
pub struct TaskEventBus {
    inner: DashMap<String, Subscribers>,
}

impl TaskEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to future events of `task_id`.
    #[must_use]
    pub fn subscribe(&self, task_id: &str) -> TaskEventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .entry(task_id.to_string())
            .or_default()
            .senders
            .push(tx);
        rx
    }

    /// Publishes an event to everyone following its task. Subscribers that
    /// went away are dropped.
    pub fn publish(&self, event: &TaskEvent) {
        let Some(task_id) = event.task_id() else {
            return;
        };
        if let Some(mut entry) = self.inner.get_mut(task_id) {
            entry.broadcast(event);
            if entry.senders.is_empty() {
                drop(entry);
                self.inner.remove(task_id);
            }
        }
    }

    /// Forgets every subscriber of `task_id`, ending their streams.
    pub fn close(&self, task_id: &str) {
        self.inner.remove(task_id);
    }

    #[must_use]
    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.inner
            .get(task_id)
            .map_or(0, |entry| entry.senders.len())
    }
}
