use super::Harness;
use crate::config::HarnessConfig;
use crate::errors::HarnessResult;
use crate::observer::StepObserver;
use crate::runtime::{AgentOptions, AgentRuntime};
use crate::session::SessionPool;
use crate::task::{InMemoryTaskStore, TaskEventBus, TaskStore};
use crate::telemetry::{CostTracker, TelemetryCallback};
use crate::translator::EventTranslator;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Assembles a [`Harness`].
///
/// Everything but the runtime has a default: configuration from
/// [`HarnessConfig::default`], an in-memory task store, and no hooks.
pub struct HarnessBuilder {
    runtime: Arc<dyn AgentRuntime>,
    config: HarnessConfig,
    store: Option<Arc<dyn TaskStore>>,
    tracker: Option<Arc<CostTracker>>,
    observers: Vec<Arc<dyn StepObserver>>,
    callbacks: Vec<Arc<dyn TelemetryCallback>>,
}

impl HarnessBuilder {
    pub fn new(runtime: impl AgentRuntime + 'static) -> Self {
        Self::from_arc(Arc::new(runtime))
    }

    #[must_use]
    pub fn from_arc(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            config: HarnessConfig::default(),
            store: None,
            tracker: None,
            observers: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces only the agent options of the current configuration.
    #[must_use]
    pub fn options(mut self, options: AgentOptions) -> Self {
        self.config.agent = options;
        self
    }

    #[must_use]
    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a cost tracker between harnesses. Its thresholds win over the
    /// configured ones.
    #[must_use]
    pub fn cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: impl StepObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    #[must_use]
    pub fn telemetry_callback(mut self, callback: impl TelemetryCallback + 'static) -> Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Validate the configuration and build the harness. Background work
    /// starts only with [`Harness::start`].
    pub fn build(self) -> HarnessResult<Harness> {
        self.config.validate()?;
        let HarnessConfig {
            agent,
            sessions,
            telemetry,
        } = self.config;

        Ok(Harness {
            runtime: self.runtime,
            sessions: Arc::new(SessionPool::new(&sessions)),
            tracker: self
                .tracker
                .unwrap_or_else(|| Arc::new(CostTracker::from_config(&telemetry))),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new())),
            events: Arc::new(TaskEventBus::new()),
            translator: EventTranslator::new(),
            observers: self.observers,
            callbacks: self.callbacks,
            options: agent,
            abort_on_error_threshold: telemetry.abort_on_error_threshold,
            running: DashMap::new(),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }
}
