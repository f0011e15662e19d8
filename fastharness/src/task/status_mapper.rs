//! Construction helpers for A2A task statuses and update events, plus the
//! task lifecycle graph.
//!
//! ```text
//! submitted ──► working ──► completed
//!     │           │  ▲
//!     │           │  └── input-required ──► canceled | failed
//!     │           └──► failed | canceled
//!     └──► failed | canceled
//! ```

use a2a_types::{
    Artifact, Message, TaskArtifactUpdateEvent, TaskState, TaskStatus, TaskStatusUpdateEvent,
};

/// A `TaskStatus` in `state`, stamped now.
#[must_use]
pub fn status(state: TaskState, message: Option<Message>) -> TaskStatus {
    TaskStatus {
        state,
        timestamp: Some(now()),
        message,
    }
}

#[must_use]
pub fn submitted_status() -> TaskStatus {
    status(TaskState::Submitted, None)
}

#[must_use]
pub fn create_status_update_event(
    task_id: &str,
    context_id: &str,
    status: TaskStatus,
    is_final: bool,
) -> TaskStatusUpdateEvent {
    TaskStatusUpdateEvent {
        kind: a2a_types::STATUS_UPDATE_KIND.to_string(),
        task_id: task_id.to_string(),
        context_id: context_id.to_string(),
        status,
        is_final,
        metadata: None,
    }
}

#[must_use]
pub fn create_artifact_update_event(
    task_id: &str,
    context_id: &str,
    artifact: Artifact,
    append: bool,
    last_chunk: bool,
) -> TaskArtifactUpdateEvent {
    TaskArtifactUpdateEvent {
        kind: a2a_types::ARTIFACT_UPDATE_KIND.to_string(),
        task_id: task_id.to_string(),
        context_id: context_id.to_string(),
        artifact,
        append: Some(append),
        last_chunk: Some(last_chunk),
        metadata: None,
    }
}

/// States no transition leaves. `input-required` is not terminal.
#[must_use]
pub const fn is_terminal_state(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Completed
            | TaskState::Failed
            | TaskState::Rejected
            | TaskState::Canceled
            | TaskState::Unknown
    )
}

/// Only `input-required` tasks accept a follow-up message.
#[must_use]
pub const fn can_continue(state: TaskState) -> bool {
    matches!(state, TaskState::InputRequired)
}

/// Status events in these states close the current interaction.
#[must_use]
pub const fn is_final_for_exchange(state: TaskState) -> bool {
    is_terminal_state(state) || can_continue(state)
}

/// Edges of the lifecycle graph. Self-loops are not transitions.
#[must_use]
pub const fn can_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::{Canceled, Completed, Failed, InputRequired, Rejected, Submitted, Working};
    matches!(
        (from, to),
        (Submitted, Working | Rejected | Failed | Canceled)
            | (Working, InputRequired | Completed | Failed | Canceled)
            | (InputRequired, Working | Failed | Canceled)
    )
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskState::*;

    #[test]
    fn status_is_stamped() {
        let stamped = status(Working, None);
        assert_eq!(stamped.state, Working);
        assert!(stamped.timestamp.is_some());
        assert!(stamped.message.is_none());
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        let all = [
            Submitted,
            Working,
            InputRequired,
            Completed,
            Canceled,
            Failed,
            Rejected,
            AuthRequired,
            Unknown,
        ];
        for from in all.into_iter().filter(|s| is_terminal_state(*s)) {
            for to in all {
                assert!(!can_transition(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn input_required_resumes_to_working_only() {
        assert!(can_continue(InputRequired));
        assert!(can_transition(InputRequired, Working));
        assert!(!can_transition(InputRequired, Completed));
        assert!(!can_transition(Submitted, Completed));
        assert!(!can_transition(Working, Working));
    }

    #[test]
    fn final_flag_covers_input_required() {
        assert!(is_final_for_exchange(InputRequired));
        assert!(is_final_for_exchange(Completed));
        assert!(!is_final_for_exchange(Working));
    }

    #[test]
    fn artifact_event_carries_flags() {
        let event = create_artifact_update_event(
            "t",
            "c",
            Artifact::new("a", Vec::new()),
            true,
            false,
        );
        assert_eq!(event.kind, "artifact-update");
        assert_eq!(event.append, Some(true));
        assert_eq!(event.last_chunk, Some(false));
    }
}
