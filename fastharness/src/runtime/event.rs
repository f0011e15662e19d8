//! Turn-scoped events emitted by the agent runtime.
//!
//! Each event carries the index of the turn it belongs to and a
//! kind-specific payload. The kinds form a closed enum so every consumer
//! handles all of them explicitly; anything the runtime emits that this
//! crate does not model arrives as [`StepKind::Unrecognized`].

use serde::{Deserialize, Serialize};

/// One occurrence in the agent runtime's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// 1-based turn index.
    pub turn: u32,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    /// The agent invoked a tool.
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// A tool returned to the agent.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Assistant text. `partial` chunks stream the text of the turn; the
    /// non-partial message carries the complete text.
    AssistantMessage {
        text: String,
        #[serde(default)]
        partial: bool,
    },
    /// End of a turn with its accounting.
    TurnComplete {
        #[serde(default)]
        usage: TurnUsage,
        /// The agent stopped to ask the user something.
        #[serde(default)]
        needs_input: bool,
        /// Final textual result reported by the runtime, if any.
        #[serde(default)]
        result: Option<String>,
        /// Output validated against the configured output schema.
        #[serde(default)]
        structured_output: Option<serde_json::Value>,
        #[serde(default)]
        is_error: bool,
    },
    /// Runtime event kind this crate does not model.
    Unrecognized { kind: String },
}

impl StepKind {
    /// Name used in logs and span attributes.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::TurnComplete { .. } => "turn_complete",
            Self::Unrecognized { kind } => kind,
        }
    }
}

/// Cost and token accounting reported at the end of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnUsage {
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
}

impl StepEvent {
    pub fn tool_call(
        turn: u32,
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            turn,
            kind: StepKind::ToolCall {
                id: id.into(),
                name: name.into(),
                input,
            },
        }
    }

    pub fn tool_result(turn: u32, tool_use_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            turn,
            kind: StepKind::ToolResult {
                tool_use_id: tool_use_id.into(),
                content,
                is_error: false,
            },
        }
    }

    pub fn assistant(turn: u32, text: impl Into<String>) -> Self {
        Self {
            turn,
            kind: StepKind::AssistantMessage {
                text: text.into(),
                partial: false,
            },
        }
    }

    pub fn assistant_chunk(turn: u32, text: impl Into<String>) -> Self {
        Self {
            turn,
            kind: StepKind::AssistantMessage {
                text: text.into(),
                partial: true,
            },
        }
    }

    pub fn turn_complete(turn: u32, usage: TurnUsage) -> Self {
        Self {
            turn,
            kind: StepKind::TurnComplete {
                usage,
                needs_input: false,
                result: None,
                structured_output: None,
                is_error: false,
            },
        }
    }

    /// A turn end where the agent is waiting on the user.
    pub fn input_required(turn: u32, usage: TurnUsage) -> Self {
        Self {
            turn,
            kind: StepKind::TurnComplete {
                usage,
                needs_input: true,
                result: None,
                structured_output: None,
                is_error: false,
            },
        }
    }

    /// Usage payload when this is a turn-complete event.
    #[must_use]
    pub const fn usage(&self) -> Option<&TurnUsage> {
        match &self.kind {
            StepKind::TurnComplete { usage, .. } => Some(usage),
            _ => None,
        }
    }
}
