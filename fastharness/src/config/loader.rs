use super::HarnessConfig;
use super::invalid;
use crate::errors::HarnessResult;
use std::path::Path;

impl HarnessConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> HarnessResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> HarnessResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk, choosing the format by file extension.
    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(invalid(
                "path",
                &format!("unsupported config extension {other:?}, expected yaml, yml or json"),
            )),
        }
    }
}
