//! Conversation-scoped execution contexts.
//!
//! A [`ConversationSession`] keeps what one conversation needs across
//! independent task requests: the exchanges completed so far and the runtime
//! client bound to it. Sessions live in the [`SessionPool`], which hands them
//! out one orchestration at a time and evicts the idle ones.

mod pool;

pub use pool::{SessionLease, SessionPool, SessionPoolStats};

use crate::errors::{HarnessError, HarnessResult};
use crate::runtime::{AgentOptions, AgentRuntime, RuntimeClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeRole {
    User,
    Assistant,
}

/// One message of a conversation as replayed to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ExchangeRole,
    pub content: String,
}

/// A successfully completed request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub task_id: String,
    pub request: String,
    pub response: String,
    pub completed_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(
        task_id: impl Into<String>,
        request: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            request: request.into(),
            response: response.into(),
            completed_at: Utc::now(),
        }
    }

    /// The exchange as two role-tagged messages, user first.
    #[must_use]
    pub fn entries(&self) -> [HistoryEntry; 2] {
        [
            HistoryEntry {
                role: ExchangeRole::User,
                content: self.request.clone(),
            },
            HistoryEntry {
                role: ExchangeRole::Assistant,
                content: self.response.clone(),
            },
        ]
    }
}

/// Per-conversation state guarded by the pool's session lock.
pub struct ConversationSession {
    key: String,
    history: Vec<Exchange>,
    client: Option<Box<dyn RuntimeClient>>,
    options_fingerprint: Option<String>,
    created_at: Instant,
    access_count: u64,
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("key", &self.key)
            .field("exchanges", &self.history.len())
            .field("connected", &self.client.is_some())
            .field("access_count", &self.access_count)
            .finish()
    }
}

impl ConversationSession {
    pub(crate) fn new(key: impl Into<String>, created_at: Instant) -> Self {
        Self {
            key: key.into(),
            history: Vec::new(),
            client: None,
            options_fingerprint: None,
            created_at,
            access_count: 0,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Completed exchanges, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Number of times the session has been handed out.
    #[must_use]
    pub const fn access_count(&self) -> u64 {
        self.access_count
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub(crate) fn mark_accessed(&mut self) {
        self.access_count += 1;
    }

    /// Record a successful turn. Failed or canceled turns must not be recorded.
    pub fn append_exchange(&mut self, exchange: Exchange) {
        self.history.push(exchange);
    }

    /// The bound runtime client, connecting on first use.
    ///
    /// When `options` no longer match the ones the client was opened with, the
    /// old client is closed and a new one connected. History is kept.
    pub async fn client(
        &mut self,
        runtime: &dyn AgentRuntime,
        options: &AgentOptions,
    ) -> HarnessResult<&mut Box<dyn RuntimeClient>> {
        let fingerprint = options.fingerprint();
        if self.client.is_some() && self.options_fingerprint.as_deref() != Some(&fingerprint) {
            warn!(
                conversation_key = %self.key,
                "Agent options changed mid-conversation, reconnecting runtime client"
            );
            self.close_client().await;
        }

        if self.client.is_none() {
            debug!(conversation_key = %self.key, model = %options.model, "Connecting runtime client");
            let client = runtime.connect(&self.key, options).await?;
            self.options_fingerprint = Some(fingerprint);
            self.client = Some(client);
        }

        self.client
            .as_mut()
            .ok_or_else(|| HarnessError::RuntimeClosed {
                conversation_key: self.key.clone(),
            })
    }

    /// Close the runtime client if one is bound. Close failures are logged.
    pub async fn close_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            self.options_fingerprint = None;
            match client.close().await {
                Ok(()) => info!(conversation_key = %self.key, "Closed runtime client"),
                Err(err) => warn!(
                    conversation_key = %self.key,
                    error = %err,
                    "Runtime client close failed"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRuntime;

    #[test]
    fn exchange_entries_are_user_then_assistant() {
        let exchange = Exchange::new("t-1", "My name is Alice", "Nice to meet you, Alice!");
        let [user, assistant] = exchange.entries();
        assert_eq!(user.role, ExchangeRole::User);
        assert_eq!(user.content, "My name is Alice");
        assert_eq!(assistant.role, ExchangeRole::Assistant);
    }

    #[tokio::test]
    async fn client_is_connected_once_and_reused() {
        let runtime = ScriptedRuntime::new();
        let mut session = ConversationSession::new("conv-A", Instant::now());
        let options = AgentOptions::default();

        session.client(&runtime, &options).await.unwrap();
        session.client(&runtime, &options).await.unwrap();

        assert!(session.is_connected());
        assert_eq!(runtime.connect_count(), 1);
    }

    #[tokio::test]
    async fn changed_options_reconnect_but_keep_history() {
        let runtime = ScriptedRuntime::new();
        let mut session = ConversationSession::new("conv-A", Instant::now());
        session.append_exchange(Exchange::new("t-1", "hi", "hello"));

        session
            .client(&runtime, &AgentOptions::default())
            .await
            .unwrap();
        let other = AgentOptions::default().with_model("claude-haiku");
        session.client(&runtime, &other).await.unwrap();

        assert_eq!(runtime.connect_count(), 2);
        assert_eq!(runtime.close_count(), 1);
        assert_eq!(session.history().len(), 1);
    }
}
