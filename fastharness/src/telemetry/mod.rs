//! Cost and usage telemetry.
//!
//! Every completed turn produces one [`ExecutionMetrics`] record. The
//! [`CostTracker`] keeps those records together with running totals and
//! raises a [`ThresholdSignal`] the first time the accumulated cost reaches
//! the warn or error threshold. Signals are informational: deciding what to
//! do about them is left to the orchestrator.

mod tracker;

pub use tracker::{CostTracker, UsageTotals};

use crate::errors::HarnessResult;
use crate::runtime::TurnUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Accounting for one completed turn. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub task_id: String,
    pub session_id: Option<String>,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    pub status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionMetrics {
    /// Builds a record from the usage a runtime reported at turn end.
    /// A missing cost counts as zero.
    pub fn from_usage(task_id: impl Into<String>, usage: &TurnUsage, status: ExecutionStatus) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: usage.session_id.clone(),
            total_cost_usd: usage.total_cost_usd.unwrap_or_default(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            duration_ms: usage.duration_ms,
            duration_api_ms: usage.duration_api_ms,
            num_turns: usage.num_turns,
            status,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLevel {
    Warn,
    Error,
}

impl ThresholdLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Raised once each time the running cost total crosses a threshold upward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSignal {
    pub level: ThresholdLevel,
    pub threshold_usd: f64,
    pub total_cost_usd: f64,
    /// Task whose record caused the crossing.
    pub task_id: String,
}

/// Consumer notified of every recorded execution.
///
/// Failures are logged by the caller and never interrupt a run.
#[async_trait]
pub trait TelemetryCallback: Send + Sync {
    async fn on_execution(&self, metrics: &ExecutionMetrics) -> HarnessResult<()>;
}
