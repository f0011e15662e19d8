//! # fastharness
//!
//! Runs a streaming agent runtime behind the A2A task protocol.
//!
//! A [`Harness`] takes user messages, leases the conversation's session from
//! the [`SessionPool`](session::SessionPool), and turns the runtime's turn
//! events into task status changes and ordered artifacts. Per-turn usage is
//! accumulated by the [`CostTracker`](telemetry::CostTracker), which raises
//! edge-triggered warn and error signals.
//!
//! ```ignore
//! use fastharness::{Harness, HarnessConfig, SubmitRequest};
//!
//! let harness = Harness::builder(my_runtime)
//!     .config(HarnessConfig::from_file("harness.yaml")?)
//!     .build()?;
//! harness.start();
//!
//! let task = harness
//!     .submit(SubmitRequest::text("conv-A", "My name is Alice").with_context_id("ctx-1"))
//!     .await?;
//! ```

pub mod config;
pub mod errors;
pub mod observability;
pub mod observer;
pub mod orchestrator;
pub mod runtime;
pub mod session;
pub mod task;
pub mod telemetry;
pub mod test_support;
pub mod translator;

pub use a2a_types as a2a;
pub use config::{HarnessConfig, SessionConfig, TelemetryConfig};
pub use errors::{HarnessError, HarnessResult};
pub use orchestrator::{Harness, HarnessBuilder, SubmitRequest};
