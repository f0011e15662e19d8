//! OpenTelemetry counters for harness activity.
//!
//! Instruments are cached after [`initialize_metrics`]; before that every
//! call looks the instrument up on the global meter, so recording works
//! whether or not the host application set up a meter provider.

use once_cell::sync::Lazy;
use opentelemetry::{
    global,
    metrics::{Counter, Meter},
    KeyValue,
};
use std::sync::RwLock;

use crate::telemetry::{ExecutionMetrics, ExecutionStatus, ThresholdLevel};

const METER_NAME: &str = "fastharness";

struct HarnessMetrics {
    cost_usd: Counter<f64>,
    tokens: Counter<u64>,
    executions: Counter<u64>,
    threshold_crossings: Counter<u64>,
    unrecognized_events: Counter<u64>,
}

impl HarnessMetrics {
    fn build(meter: &Meter) -> Self {
        Self {
            cost_usd: meter
                .f64_counter("fastharness.cost.usd")
                .with_description("Accumulated agent cost in USD")
                .init(),
            tokens: meter
                .u64_counter("fastharness.tokens")
                .with_description("Tokens consumed, by token type")
                .init(),
            executions: meter
                .u64_counter("fastharness.executions")
                .with_description("Completed agent turns, by status")
                .init(),
            threshold_crossings: meter
                .u64_counter("fastharness.threshold.crossings")
                .with_description("Cost threshold crossings, by level")
                .init(),
            unrecognized_events: meter
                .u64_counter("fastharness.events.unrecognized")
                .with_description("Runtime events with no protocol mapping")
                .init(),
        }
    }
}

static METRICS: Lazy<RwLock<Option<HarnessMetrics>>> = Lazy::new(|| RwLock::new(None));

/// Cache instruments on the current global meter provider. Safe to call repeatedly.
pub fn initialize_metrics() {
    let metrics = HarnessMetrics::build(&global::meter(METER_NAME));
    if let Ok(mut slot) = METRICS.write() {
        *slot = Some(metrics);
    }
}

fn with_metrics(record: impl FnOnce(&HarnessMetrics)) {
    if let Ok(cached) = METRICS.read() {
        if let Some(metrics) = cached.as_ref() {
            record(metrics);
            return;
        }
    }
    record(&HarnessMetrics::build(&global::meter(METER_NAME)));
}

pub fn record_execution_metric(metrics: &ExecutionMetrics) {
    let status = match metrics.status {
        ExecutionStatus::Success => "success",
        ExecutionStatus::Error => "error",
    };
    with_metrics(|m| {
        m.executions.add(1, &[KeyValue::new("status", status)]);
        m.cost_usd.add(metrics.total_cost_usd.max(0.0), &[]);
        for (kind, count) in [
            ("input", metrics.input_tokens),
            ("output", metrics.output_tokens),
            ("cache_read", metrics.cache_read_tokens),
            ("cache_write", metrics.cache_write_tokens),
        ] {
            if count > 0 {
                m.tokens.add(count, &[KeyValue::new("token_type", kind)]);
            }
        }
    });
}

pub fn record_threshold_crossing(level: ThresholdLevel) {
    with_metrics(|m| {
        m.threshold_crossings
            .add(1, &[KeyValue::new("level", level.as_str())]);
    });
}

pub fn record_unrecognized_event(kind: &str) {
    with_metrics(|m| {
        m.unrecognized_events
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    });
}
