//! Harness configuration.
//!
//! Configuration is plain serde data with a default for every field. Load it
//! with [`HarnessConfig::from_yaml_str`], [`HarnessConfig::from_json_str`] or
//! [`HarnessConfig::from_file`]; all three validate before returning.

mod loader;
mod types;

pub(crate) use types::invalid;
pub use types::{HarnessConfig, SessionConfig, TelemetryConfig};
