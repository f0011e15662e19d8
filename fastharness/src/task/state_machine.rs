use super::status_mapper::{
    can_transition, create_artifact_update_event, create_status_update_event,
    is_final_for_exchange, is_terminal_state, status, submitted_status,
};
use super::TaskEvent;
use crate::errors::{HarnessError, HarnessResult};
use crate::translator::Directive;
use a2a_types::{Artifact, Message, Part, Task, TaskState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Structured failure detail stored under `metadata.error` of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }
}

impl From<&HarnessError> for ErrorDetail {
    fn from(error: &HarnessError) -> Self {
        Self::new(error.category(), error.summary())
    }
}

/// Lifecycle owner of one task.
///
/// Every accepted change returns the protocol event describing it. The
/// machine is owned by a single orchestration and never shared.
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    task: Task,
    /// Requested artifact id to the stored id still receiving chunks under it.
    open_artifacts: HashMap<String, String>,
}

impl TaskStateMachine {
    /// A new task in `submitted`.
    pub fn new(task_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            task: Task::new(task_id, context_id, submitted_status()),
            open_artifacts: HashMap::new(),
        }
    }

    /// Resume driving a previously stored task.
    #[must_use]
    pub fn from_task(task: Task) -> Self {
        Self {
            task,
            open_artifacts: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    #[must_use]
    pub fn into_task(self) -> Task {
        self.task
    }

    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.task.status.state
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        is_terminal_state(self.task.status.state)
    }

    /// The failure recorded by [`fail`](Self::fail), if any.
    #[must_use]
    pub fn error(&self) -> Option<ErrorDetail> {
        self.task
            .metadata
            .as_ref()
            .and_then(|meta| meta.get("error"))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Apply one translator directive. Directives for a terminal task, and
    /// status changes the lifecycle graph does not allow, are logged and
    /// dropped. Re-asserting the current state emits nothing.
    pub fn apply(&mut self, directive: Directive) -> Option<TaskEvent> {
        if self.is_terminal() {
            warn!(
                task_id = %self.task.id,
                state = %self.state(),
                directive = directive.label(),
                "Ignoring directive for terminal task"
            );
            return None;
        }

        match directive {
            Directive::AppendArtifact {
                artifact,
                append,
                last_chunk,
            } => Some(self.append_artifact(artifact, append, last_chunk)),
            Directive::UpdateStatus { state, message } => {
                if state == self.state() {
                    return None;
                }
                let message = message.map(|text| self.agent_message(text));
                match self.transition(state, message) {
                    Ok(event) => Some(event),
                    Err(err) => {
                        warn!(task_id = %self.task.id, error = %err, "Dropping status directive");
                        None
                    }
                }
            }
        }
    }

    fn append_artifact(&mut self, artifact: Artifact, append: bool, last_chunk: bool) -> TaskEvent {
        let requested = artifact.artifact_id.clone();
        let open = self.open_artifacts.get(&requested).cloned();
        let extends = append && open.is_some();

        let mut sent = artifact;
        match open {
            Some(target) => {
                sent.artifact_id = target;
                let index = self
                    .task
                    .artifacts
                    .iter()
                    .position(|existing| existing.artifact_id == sent.artifact_id);
                match index {
                    Some(index) if append => {
                        let existing = &mut self.task.artifacts[index];
                        for part in sent.parts.iter().cloned() {
                            merge_part(&mut existing.parts, part);
                        }
                    }
                    // The complete unit supersedes its streamed chunks in place.
                    Some(index) => self.task.artifacts[index] = sent.clone(),
                    None => self.task.artifacts.push(sent.clone()),
                }
            }
            None => {
                // A finished artifact keeps its id; new content under it gets the next free one.
                sent.artifact_id = self.next_free_id(&requested);
                self.task.artifacts.push(sent.clone());
            }
        }

        if last_chunk {
            self.open_artifacts.remove(&requested);
        } else {
            self.open_artifacts.insert(requested, sent.artifact_id.clone());
        }

        debug!(
            task_id = %self.task.id,
            artifact_id = %sent.artifact_id,
            append,
            last_chunk,
            "Appended artifact"
        );
        TaskEvent::ArtifactUpdate(create_artifact_update_event(
            &self.task.id,
            &self.task.context_id,
            sent,
            extends,
            last_chunk,
        ))
    }

    /// `id` when unused, else `{id}-{k}` with `k` one past the ids already derived from it.
    fn next_free_id(&self, id: &str) -> String {
        let prefix = format!("{id}-");
        let used = self
            .task
            .artifacts
            .iter()
            .filter(|a| a.artifact_id == id || a.artifact_id.starts_with(&prefix))
            .count();
        if used == 0 {
            id.to_string()
        } else {
            format!("{id}-{}", used + 1)
        }
    }

    fn transition(&mut self, to: TaskState, message: Option<Message>) -> HarnessResult<TaskEvent> {
        let from = self.state();
        if !can_transition(from, to) {
            return Err(HarnessError::InvalidStateTransition { from, to });
        }

        self.task.status = status(to, message);
        if is_terminal_state(to) {
            self.open_artifacts.clear();
        }
        debug!(task_id = %self.task.id, %from, %to, "Task state changed");
        Ok(TaskEvent::StatusUpdate(create_status_update_event(
            &self.task.id,
            &self.task.context_id,
            self.task.status.clone(),
            is_final_for_exchange(to),
        )))
    }

    /// `submitted` → `working`.
    pub fn start(&mut self) -> HarnessResult<TaskEvent> {
        if self.state() != TaskState::Submitted {
            return Err(HarnessError::InvalidStateTransition {
                from: self.state(),
                to: TaskState::Working,
            });
        }
        self.transition(TaskState::Working, None)
    }

    /// `input-required` → `working` on a follow-up message, which is added
    /// to the task history. Returns the status event, then the message event.
    pub fn resume(&mut self, message: Message) -> HarnessResult<[TaskEvent; 2]> {
        if self.state() != TaskState::InputRequired {
            return Err(HarnessError::InvalidStateTransition {
                from: self.state(),
                to: TaskState::Working,
            });
        }
        let status = self.transition(TaskState::Working, None)?;
        Ok([status, self.record_message(message)])
    }

    /// `working` → `completed`, with an optional final agent message.
    pub fn complete(&mut self, message: Option<String>) -> HarnessResult<TaskEvent> {
        let message = message.map(|text| self.agent_message(text));
        self.transition(TaskState::Completed, message)
    }

    /// Move to `failed` from any non-terminal state. Artifacts are kept.
    pub fn fail(&mut self, detail: ErrorDetail) -> HarnessResult<TaskEvent> {
        let message = self.agent_message(format!("An error occurred: {}", detail.message));
        let event = self.transition(TaskState::Failed, Some(message))?;
        let value = serde_json::to_value(&detail)?;
        self.task
            .metadata
            .get_or_insert_with(Default::default)
            .insert("error".to_string(), value);
        Ok(event)
    }

    /// Move to `canceled` from any non-terminal state.
    pub fn cancel(&mut self) -> HarnessResult<TaskEvent> {
        self.transition(TaskState::Canceled, None)
    }

    /// Add a message to the task history, bound to this task.
    pub fn record_message(&mut self, message: Message) -> TaskEvent {
        let message = message.with_task(&self.task.id, &self.task.context_id);
        self.task.history.push(message.clone());
        TaskEvent::Message(message)
    }

    fn agent_message(&self, text: String) -> Message {
        Message::agent_text(text).with_task(&self.task.id, &self.task.context_id)
    }
}

/// Extend the artifact's trailing text rather than adding a part per chunk.
fn merge_part(parts: &mut Vec<Part>, part: Part) {
    if let (Some(Part::Text { text: tail, .. }), Part::Text { text, .. }) = (parts.last_mut(), &part)
    {
        tail.push_str(text);
        return;
    }
    parts.push(part);
}
