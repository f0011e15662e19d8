use super::{ExecutionMetrics, ThresholdLevel, ThresholdSignal};
use crate::config::TelemetryConfig;
use crate::observability::metrics;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Running sums over every recorded execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub execution_count: usize,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub duration_ms: u64,
}

impl UsageTotals {
    fn add(&mut self, metrics: &ExecutionMetrics) {
        self.execution_count += 1;
        self.total_cost_usd += metrics.total_cost_usd;
        self.input_tokens += metrics.input_tokens;
        self.output_tokens += metrics.output_tokens;
        self.cache_read_tokens += metrics.cache_read_tokens;
        self.cache_write_tokens += metrics.cache_write_tokens;
        self.duration_ms += metrics.duration_ms;
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    executions: Vec<ExecutionMetrics>,
    totals: UsageTotals,
    warn_crossed: bool,
    error_crossed: bool,
    signals: Vec<ThresholdSignal>,
}

/// Thread-safe cost accumulator with edge-triggered threshold alerts.
///
/// `record` holds the internal lock only for the in-memory update; logging,
/// metric export and signal delivery happen after it is released.
#[derive(Debug)]
pub struct CostTracker {
    warn_threshold_usd: f64,
    error_threshold_usd: f64,
    state: Mutex<TrackerState>,
    signal_tx: broadcast::Sender<ThresholdSignal>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

impl CostTracker {
    #[must_use]
    pub fn new(warn_threshold_usd: f64, error_threshold_usd: f64) -> Self {
        let (signal_tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            warn_threshold_usd,
            error_threshold_usd,
            state: Mutex::new(TrackerState::default()),
            signal_tx,
        }
    }

    #[must_use]
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.warn_threshold_usd, config.error_threshold_usd)
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record and return the threshold signals it triggered.
    pub fn record(&self, execution: ExecutionMetrics) -> Vec<ThresholdSignal> {
        metrics::record_execution_metric(&execution);
        debug!(
            task_id = %execution.task_id,
            cost_usd = execution.total_cost_usd,
            tokens = execution.total_tokens(),
            "Recorded execution"
        );

        let signals = {
            let mut state = self.lock();
            state.totals.add(&execution);
            let total = state.totals.total_cost_usd;

            let mut raised = Vec::new();
            for (level, threshold) in [
                (ThresholdLevel::Warn, self.warn_threshold_usd),
                (ThresholdLevel::Error, self.error_threshold_usd),
            ] {
                let crossed = match level {
                    ThresholdLevel::Warn => &mut state.warn_crossed,
                    ThresholdLevel::Error => &mut state.error_crossed,
                };
                if total >= threshold {
                    if !*crossed {
                        *crossed = true;
                        raised.push(ThresholdSignal {
                            level,
                            threshold_usd: threshold,
                            total_cost_usd: total,
                            task_id: execution.task_id.clone(),
                        });
                    }
                } else {
                    // Re-arm once the total is back under the line.
                    *crossed = false;
                }
            }
            state.signals.extend(raised.iter().cloned());
            state.executions.push(execution);
            raised
        };

        for signal in &signals {
            match signal.level {
                ThresholdLevel::Warn => warn!(
                    task_id = %signal.task_id,
                    total_cost_usd = signal.total_cost_usd,
                    threshold_usd = signal.threshold_usd,
                    "Cost warning threshold crossed"
                ),
                ThresholdLevel::Error => error!(
                    task_id = %signal.task_id,
                    total_cost_usd = signal.total_cost_usd,
                    threshold_usd = signal.threshold_usd,
                    "Cost error threshold crossed"
                ),
            }
            metrics::record_threshold_crossing(signal.level);
            // No subscribers is fine.
            let _ = self.signal_tx.send(signal.clone());
        }

        signals
    }

    /// Live feed of threshold signals raised after subscribing.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ThresholdSignal> {
        self.signal_tx.subscribe()
    }

    #[must_use]
    pub fn total_cost_usd(&self) -> f64 {
        self.lock().totals.total_cost_usd
    }

    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.lock().totals.execution_count
    }

    #[must_use]
    pub fn totals(&self) -> UsageTotals {
        self.lock().totals.clone()
    }

    /// One-line digest for logs and shutdown reports.
    #[must_use]
    pub fn summary(&self) -> String {
        let totals = self.totals();
        format!(
            "{} executions, ${:.4} total, {} input / {} output tokens, {} cache read / {} cache write tokens, {}ms",
            totals.execution_count,
            totals.total_cost_usd,
            totals.input_tokens,
            totals.output_tokens,
            totals.cache_read_tokens,
            totals.cache_write_tokens,
            totals.duration_ms,
        )
    }

    /// Snapshot of all records, oldest first.
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionMetrics> {
        self.lock().executions.clone()
    }

    /// Every signal raised so far, in order.
    #[must_use]
    pub fn signals(&self) -> Vec<ThresholdSignal> {
        self.lock().signals.clone()
    }

    /// True while the running total sits at or above the warn threshold.
    #[must_use]
    pub fn warn_signaled(&self) -> bool {
        self.lock().warn_crossed
    }

    /// True while the running total sits at or above the error threshold.
    #[must_use]
    pub fn error_signaled(&self) -> bool {
        self.lock().error_crossed
    }

    #[must_use]
    pub const fn thresholds(&self) -> (f64, f64) {
        (self.warn_threshold_usd, self.error_threshold_usd)
    }

    /// Drop all records and re-arm both thresholds.
    pub fn reset(&self) {
        *self.lock() = TrackerState::default();
    }
}
