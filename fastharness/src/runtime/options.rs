use crate::config::invalid;
use crate::errors::HarnessResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// How the runtime may act on tool permission prompts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    #[default]
    BypassPermissions,
}

/// Connection descriptor for an external tool server the runtime attaches to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

/// Execution options handed to the agent runtime with every run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentOptions {
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub max_turns: Option<u32>,
    pub permission_mode: PermissionMode,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    pub setting_sources: Vec<String>,
    /// JSON schema the final answer must satisfy.
    pub output_format: Option<serde_json::Value>,
    pub cwd: Option<PathBuf>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            allowed_tools: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            max_turns: None,
            permission_mode: PermissionMode::default(),
            mcp_servers: BTreeMap::new(),
            setting_sources: vec!["project".to_string()],
            output_format: None,
            cwd: None,
        }
    }
}

impl AgentOptions {
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    #[must_use]
    pub fn with_output_format(mut self, schema: serde_json::Value) -> Self {
        self.output_format = Some(schema);
        self
    }

    pub(crate) fn validate(&self) -> HarnessResult<()> {
        if self.model.trim().is_empty() {
            return Err(invalid("agent.model", "must not be empty"));
        }
        if self.max_turns == Some(0) {
            return Err(invalid("agent.max_turns", "must be at least 1 when set"));
        }
        Ok(())
    }

    /// Stable digest of the fields that change how a runtime client behaves.
    ///
    /// Two option sets with the same fingerprint can share a connected client.
    /// Turn limits and the working directory are excluded since they apply
    /// per run. Tool order does not matter.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut allowed_tools: Vec<&str> = self.allowed_tools.iter().map(String::as_str).collect();
        allowed_tools.sort_unstable();
        let relevant = serde_json::json!({
            "system_prompt": self.system_prompt,
            "allowed_tools": allowed_tools,
            "model": self.model,
            "permission_mode": self.permission_mode,
            "mcp_servers": self.mcp_servers.keys().collect::<Vec<_>>(),
            "setting_sources": self.setting_sources,
            "output_format": self.output_format,
        });
        let mut hasher = Sha256::new();
        hasher.update(relevant.to_string().as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }
}
