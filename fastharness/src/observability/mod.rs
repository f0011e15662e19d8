//! Logging and metrics plumbing.
//!
//! The harness logs through `tracing` and counts through the OpenTelemetry
//! global meter. Neither requires setup: without a subscriber or meter
//! provider both are no-ops. Applications that want console output call
//! [`init_logging`]; applications exporting metrics set a meter provider and
//! then call [`metrics::initialize_metrics`].

mod logging;
pub mod metrics;
pub mod semantic_conventions;

pub use logging::{init_logging, DEFAULT_LOG_FILTER};
