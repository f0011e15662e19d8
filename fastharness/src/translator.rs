//! Maps agent runtime events onto task protocol directives.
//!
//! Translation is a pure function of one [`StepEvent`]: the same event always
//! yields the same directives, and nothing about the task is read or
//! written. The only state kept here is a pair of diagnostic counters for
//! events that could not be mapped.
//!
//! | event                         | directives                                   |
//! |-------------------------------|----------------------------------------------|
//! | tool call                     | data artifact `{"tool_use": ...}`            |
//! | tool result                   | data artifact `{"tool_result": ...}`         |
//! | assistant message, partial    | text chunk appended to the turn's artifact   |
//! | assistant message, final      | complete text, replacing streamed chunks     |
//! | turn complete                 | structured output artifact (if any), status  |
//! | unrecognized                  | nothing; counted                             |

use crate::errors::{HarnessError, HarnessResult};
use crate::observability::metrics;
use crate::runtime::{StepEvent, StepKind};
use a2a_types::{Artifact, Part, TaskState};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub const TOOL_USE_ARTIFACT: &str = "tool_use";
pub const TOOL_RESULT_ARTIFACT: &str = "tool_result";
pub const RESULT_ARTIFACT: &str = "result";
pub const STRUCTURED_OUTPUT_ARTIFACT: &str = "structured_output";

/// One protocol-level update derived from a runtime event.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Add an artifact, or extend (`append`) or finish (`last_chunk`) one
    /// previously sent under the same id.
    AppendArtifact {
        artifact: Artifact,
        append: bool,
        last_chunk: bool,
    },
    /// Move the task to `state`, with an optional agent message.
    UpdateStatus {
        state: TaskState,
        message: Option<String>,
    },
}

impl Directive {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AppendArtifact { .. } => "artifact-append",
            Self::UpdateStatus { .. } => "status-update",
        }
    }
}

/// Identifiers of the task an event belongs to. Used for log correlation only.
#[derive(Debug, Clone, Copy)]
pub struct TaskRef<'a> {
    pub task_id: &'a str,
    pub context_id: &'a str,
}

#[derive(Debug, Default)]
pub struct EventTranslator {
    unrecognized: AtomicU64,
    rejected: AtomicU64,
}

impl EventTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one event. Events that cannot be mapped produce no
    /// directives and bump a diagnostic counter; they never fail the task.
    pub fn translate(&self, event: &StepEvent, task: TaskRef<'_>) -> Vec<Directive> {
        if let StepKind::Unrecognized { kind } = &event.kind {
            self.unrecognized.fetch_add(1, Ordering::Relaxed);
            metrics::record_unrecognized_event(kind);
            debug!(
                task_id = %task.task_id,
                turn = event.turn,
                kind = %kind,
                "Ignoring unrecognized runtime event"
            );
            return Vec::new();
        }

        match Self::try_translate(event) {
            Ok(directives) => directives,
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task_id = %task.task_id,
                    context_id = %task.context_id,
                    error = %err,
                    "Dropping runtime event that could not be translated"
                );
                Vec::new()
            }
        }
    }

    /// The pure mapping. Unrecognized events map to nothing.
    pub fn try_translate(event: &StepEvent) -> HarnessResult<Vec<Directive>> {
        let turn = event.turn;
        let directives = match &event.kind {
            StepKind::ToolCall { id, name, input } => {
                if name.is_empty() || id.is_empty() {
                    return Err(HarnessError::Translation {
                        turn,
                        reason: "tool call without id or name".to_string(),
                    });
                }
                let part = Part::data(json!({
                    "tool_use": { "id": id, "name": name, "input": input }
                }));
                vec![new_artifact(
                    Artifact::new(format!("tool-use-{id}"), vec![part]).with_name(TOOL_USE_ARTIFACT),
                )]
            }
            StepKind::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                if tool_use_id.is_empty() {
                    return Err(HarnessError::Translation {
                        turn,
                        reason: "tool result without tool_use_id".to_string(),
                    });
                }
                let part = Part::data(json!({
                    "tool_result": {
                        "tool_use_id": tool_use_id,
                        "content": content,
                        "is_error": is_error,
                    }
                }));
                vec![new_artifact(
                    Artifact::new(format!("tool-result-{tool_use_id}"), vec![part])
                        .with_name(TOOL_RESULT_ARTIFACT),
                )]
            }
            StepKind::AssistantMessage { text, .. } if text.is_empty() => Vec::new(),
            StepKind::AssistantMessage { text, partial } => {
                let artifact = Artifact::new(turn_artifact_id(turn), vec![Part::text(text.as_str())])
                    .with_name(RESULT_ARTIFACT);
                vec![Directive::AppendArtifact {
                    artifact,
                    append: *partial,
                    last_chunk: !*partial,
                }]
            }
            StepKind::TurnComplete {
                needs_input,
                result,
                structured_output,
                ..
            } => {
                let mut directives = Vec::with_capacity(2);
                if let Some(output) = structured_output {
                    directives.push(new_artifact(
                        Artifact::new(
                            format!("structured-output-turn-{turn}"),
                            vec![Part::data(output.clone())],
                        )
                        .with_name(STRUCTURED_OUTPUT_ARTIFACT),
                    ));
                }
                directives.push(if *needs_input {
                    Directive::UpdateStatus {
                        state: TaskState::InputRequired,
                        message: result.clone(),
                    }
                } else {
                    Directive::UpdateStatus {
                        state: TaskState::Working,
                        message: None,
                    }
                });
                directives
            }
            StepKind::Unrecognized { .. } => Vec::new(),
        };
        Ok(directives)
    }

    /// Events dropped because their kind is unknown.
    #[must_use]
    pub fn unrecognized_count(&self) -> u64 {
        self.unrecognized.load(Ordering::Relaxed)
    }

    /// Events dropped because they were malformed.
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Artifact id shared by all assistant text of one turn.
#[must_use]
pub fn turn_artifact_id(turn: u32) -> String {
    format!("assistant-turn-{turn}")
}

fn new_artifact(artifact: Artifact) -> Directive {
    Directive::AppendArtifact {
        artifact,
        append: false,
        last_chunk: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TurnUsage;

    const TASK: TaskRef<'static> = TaskRef {
        task_id: "t-1",
        context_id: "ctx-1",
    };

    fn single(directives: Vec<Directive>) -> (Artifact, bool, bool) {
        assert_eq!(directives.len(), 1);
        match directives.into_iter().next() {
            Some(Directive::AppendArtifact {
                artifact,
                append,
                last_chunk,
            }) => (artifact, append, last_chunk),
            other => panic!("expected artifact directive, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_becomes_tool_use_data_artifact() {
        let translator = EventTranslator::new();
        let event = StepEvent::tool_call(1, "toolu_1", "Read", json!({"path": "a.rs"}));
        let (artifact, append, _) = single(translator.translate(&event, TASK));

        assert!(!append);
        assert_eq!(artifact.name.as_deref(), Some(TOOL_USE_ARTIFACT));
        let data = artifact.parts[0].as_data().unwrap();
        assert_eq!(data["tool_use"]["name"], "Read");
        assert_eq!(data["tool_use"]["id"], "toolu_1");
        assert_eq!(data["tool_use"]["input"]["path"], "a.rs");
    }

    #[test]
    fn tool_result_references_its_call() {
        let event = StepEvent::tool_result(1, "toolu_1", json!("file contents"));
        let (artifact, _, _) = single(EventTranslator::try_translate(&event).unwrap());
        let data = artifact.parts[0].as_data().unwrap();
        assert_eq!(data["tool_result"]["tool_use_id"], "toolu_1");
        assert_eq!(data["tool_result"]["is_error"], false);
    }

    #[test]
    fn partial_and_final_text_share_the_turn_artifact() {
        let (chunk, append, last) = single(
            EventTranslator::try_translate(&StepEvent::assistant_chunk(3, "Hel")).unwrap(),
        );
        assert!(append);
        assert!(!last);
        assert_eq!(chunk.artifact_id, "assistant-turn-3");

        let (full, append, last) =
            single(EventTranslator::try_translate(&StepEvent::assistant(3, "Hello")).unwrap());
        assert!(!append);
        assert!(last);
        assert_eq!(full.artifact_id, chunk.artifact_id);
        assert_eq!(full.parts[0].as_text(), Some("Hello"));
    }

    #[test]
    fn turn_complete_keeps_working_unless_input_is_needed() {
        let done = StepEvent::turn_complete(1, TurnUsage::default());
        assert_eq!(
            EventTranslator::try_translate(&done).unwrap(),
            vec![Directive::UpdateStatus {
                state: TaskState::Working,
                message: None
            }]
        );

        let mut ask = StepEvent::input_required(1, TurnUsage::default());
        if let StepKind::TurnComplete { result, .. } = &mut ask.kind {
            *result = Some("Which file?".into());
        }
        assert_eq!(
            EventTranslator::try_translate(&ask).unwrap(),
            vec![Directive::UpdateStatus {
                state: TaskState::InputRequired,
                message: Some("Which file?".into())
            }]
        );
    }

    #[test]
    fn structured_output_precedes_the_status_update() {
        let mut event = StepEvent::turn_complete(2, TurnUsage::default());
        if let StepKind::TurnComplete {
            structured_output, ..
        } = &mut event.kind
        {
            *structured_output = Some(json!({"answer": 42}));
        }
        let directives = EventTranslator::try_translate(&event).unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].label(), "artifact-append");
        assert_eq!(directives[1].label(), "status-update");
    }

    #[test]
    fn unrecognized_events_are_counted_not_failed() {
        let translator = EventTranslator::new();
        let event = StepEvent {
            turn: 1,
            kind: StepKind::Unrecognized {
                kind: "thinking".into(),
            },
        };
        assert!(translator.translate(&event, TASK).is_empty());
        assert!(translator.translate(&event, TASK).is_empty());
        assert_eq!(translator.unrecognized_count(), 2);
        assert_eq!(translator.rejected_count(), 0);
    }

    #[test]
    fn malformed_tool_call_is_absorbed() {
        let translator = EventTranslator::new();
        let event = StepEvent::tool_call(4, "toolu_9", "", json!({}));
        assert!(matches!(
            EventTranslator::try_translate(&event),
            Err(HarnessError::Translation { turn: 4, .. })
        ));
        assert!(translator.translate(&event, TASK).is_empty());
        assert_eq!(translator.rejected_count(), 1);
    }

    #[test]
    fn empty_text_produces_nothing() {
        assert!(EventTranslator::try_translate(&StepEvent::assistant_chunk(1, ""))
            .unwrap()
            .is_empty());
    }
}
