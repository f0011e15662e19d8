//! Error type shared by every harness component.

use a2a_types::TaskState;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    // === Agent Runtime Errors ===
    #[error("Agent execution failed: {reason}")]
    RuntimeInvocation { reason: String },

    #[error("Runtime client closed: {conversation_key}")]
    RuntimeClosed { conversation_key: String },

    // === Session Errors ===
    #[error("Session lock timeout: {conversation_key} after {waited_ms}ms")]
    SessionLockTimeout {
        conversation_key: String,
        waited_ms: u64,
    },

    #[error("Session pool is shut down")]
    PoolClosed,

    // === Translation Errors ===
    #[error("Event translation failed at turn {turn}: {reason}")]
    Translation { turn: u32, reason: String },

    // === Task Errors ===
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task already running: {task_id}")]
    TaskAlreadyRunning { task_id: String },

    #[error("Task cannot be canceled: {task_id} is {state}")]
    TaskNotCancelable { task_id: String, state: TaskState },

    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskState, to: TaskState },

    // === Configuration Errors ===
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Serialization error: {format}: {reason}")]
    Serialization { format: String, reason: String },

    // === General System Errors ===
    #[error("Internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

/// Convenience type alias
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionLockTimeout { .. } | Self::TaskAlreadyRunning { .. }
        )
    }

    /// Coarse grouping used as a log field.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::RuntimeInvocation { .. } | Self::RuntimeClosed { .. } => "runtime",
            Self::SessionLockTimeout { .. } | Self::PoolClosed => "session",
            Self::Translation { .. } => "translation",
            Self::TaskNotFound { .. }
            | Self::TaskAlreadyRunning { .. }
            | Self::TaskNotCancelable { .. }
            | Self::InvalidStateTransition { .. } => "task",
            Self::InvalidConfiguration { .. } | Self::Serialization { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }

    /// Wraps a runtime failure, keeping the error's own description.
    pub fn runtime(reason: impl std::fmt::Display) -> Self {
        Self::RuntimeInvocation {
            reason: reason.to_string(),
        }
    }

    /// Short human readable summary suitable for a failed task's status message.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::RuntimeInvocation { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            format: "json".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            format: "yaml".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(error: std::io::Error) -> Self {
        Self::Internal {
            component: "io".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for HarnessError {
    fn from(error: tokio::task::JoinError) -> Self {
        let reason = if error.is_cancelled() {
            "task cancelled".to_string()
        } else if error.is_panic() {
            "task panicked".to_string()
        } else {
            error.to_string()
        };

        Self::Internal {
            component: "task".to_string(),
            reason,
        }
    }
}
