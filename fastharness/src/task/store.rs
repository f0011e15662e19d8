//! Task persistence.
//!
//! The store keeps the latest snapshot of every task plus its ordered event
//! log. Snapshots are upserted after each accepted change so a task can be
//! polled at any point of its lifecycle.

use super::TaskEvent;
use crate::errors::HarnessResult;
use a2a_types::Task;
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, task_id: &str) -> HarnessResult<Option<Task>>;

    /// Stores or replaces a task snapshot.
    async fn save_task(&self, task: &Task) -> HarnessResult<()>;

    /// Appends to the task's event log. Messages without a task id are kept
    /// under `_unbound:{context_id}`.
    async fn add_task_event(&self, event: &TaskEvent) -> HarnessResult<()>;

    /// Events of one task, oldest first.
    async fn get_task_events(&self, task_id: &str) -> HarnessResult<Vec<TaskEvent>>;

    /// All tasks, optionally restricted to one context.
    async fn list_tasks(&self, context_id: Option<&str>) -> HarnessResult<Vec<Task>>;
}

/// Thread-safe in-memory [`TaskStore`].
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<String, Task>,
    events: DashMap<String, Vec<TaskEvent>>,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, task_id: &str) -> HarnessResult<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|t| t.value().clone()))
    }

    async fn save_task(&self, task: &Task) -> HarnessResult<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn add_task_event(&self, event: &TaskEvent) -> HarnessResult<()> {
        let key = match event {
            TaskEvent::Message(msg) => msg.task_id.clone().unwrap_or_else(|| {
                format!("_unbound:{}", msg.context_id.as_deref().unwrap_or("default"))
            }),
            TaskEvent::StatusUpdate(update) => update.task_id.clone(),
            TaskEvent::ArtifactUpdate(update) => update.task_id.clone(),
        };
        self.events.entry(key).or_default().push(event.clone());
        Ok(())
    }

    async fn get_task_events(&self, task_id: &str) -> HarnessResult<Vec<TaskEvent>> {
        Ok(self
            .events
            .get(task_id)
            .map_or_else(Vec::new, |v| v.value().clone()))
    }

    async fn list_tasks(&self, context_id: Option<&str>) -> HarnessResult<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .map(|item| item.value().clone())
            .filter(|task| context_id.map_or(true, |cid| task.context_id == cid))
            .collect())
    }
}
