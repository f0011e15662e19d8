use crate::errors::{HarnessError, HarnessResult};
use crate::runtime::AgentOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level harness configuration, usually read from YAML or JSON.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Options handed to the agent runtime for every run.
    pub agent: AgentOptions,

    pub sessions: SessionConfig,

    pub telemetry: TelemetryConfig,
}

impl HarnessConfig {
    /// Rejects configurations the pool or the cost tracker cannot honor.
    pub fn validate(&self) -> HarnessResult<()> {
        self.sessions.validate()?;
        self.telemetry.validate()?;
        self.agent.validate()
    }
}

/// Session pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle time after which a session becomes eligible for eviction.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the background sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Longest a request waits for a busy conversation before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Optional cap; idle sessions are evicted least-recently-used first when exceeded.
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            max_sessions: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn validate(&self) -> HarnessResult<()> {
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sessions.sweep_interval_secs", "must be positive"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(invalid("sessions.lock_timeout_ms", "must be positive"));
        }
        if self.max_sessions == Some(0) {
            return Err(invalid("sessions.max_sessions", "must be at least 1 when set"));
        }
        Ok(())
    }
}

/// Cost alerting thresholds and the orchestrator's reaction to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_warn_threshold_usd")]
    pub warn_threshold_usd: f64,

    #[serde(default = "default_error_threshold_usd")]
    pub error_threshold_usd: f64,

    /// Cancel the in-flight run when the error threshold is crossed.
    #[serde(default)]
    pub abort_on_error_threshold: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            warn_threshold_usd: default_warn_threshold_usd(),
            error_threshold_usd: default_error_threshold_usd(),
            abort_on_error_threshold: false,
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> HarnessResult<()> {
        if !(self.warn_threshold_usd.is_finite() && self.warn_threshold_usd >= 0.0) {
            return Err(invalid(
                "telemetry.warn_threshold_usd",
                "must be a non-negative number",
            ));
        }
        if !(self.error_threshold_usd.is_finite() && self.error_threshold_usd >= 0.0) {
            return Err(invalid(
                "telemetry.error_threshold_usd",
                "must be a non-negative number",
            ));
        }
        if self.error_threshold_usd < self.warn_threshold_usd {
            return Err(invalid(
                "telemetry.error_threshold_usd",
                "must not be below warn_threshold_usd",
            ));
        }
        Ok(())
    }
}

pub(crate) fn invalid(field: &str, reason: &str) -> HarnessError {
    HarnessError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn default_session_ttl_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_warn_threshold_usd() -> f64 {
    1.0
}

fn default_error_threshold_usd() -> f64 {
    10.0
}
