//! Fakes for exercising the harness without a real agent runtime.
//!
//! [`ScriptedRuntime`] replays queued event sequences (or a script closure)
//! and records every request it receives, so tests can assert on both what
//! the harness produced and what it sent. [`RecordingObserver`] and
//! [`RecordingTelemetry`] capture hook invocations and can be told to fail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::{HarnessError, HarnessResult};
use crate::observer::StepObserver;
use crate::runtime::{
    AgentOptions, AgentRuntime, RunRequest, RuntimeClient, StepEvent, StepStream, TurnUsage,
};
use crate::telemetry::{ExecutionMetrics, TelemetryCallback};
use crate::translator::Directive;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

type ScriptFn = dyn Fn(&RunRequest) -> Vec<HarnessResult<StepEvent>> + Send + Sync;

enum ScriptedRun {
    Events {
        events: Vec<HarnessResult<StepEvent>>,
        hang: bool,
    },
    Fail(String),
}

struct Shared {
    runs: Mutex<VecDeque<ScriptedRun>>,
    script: Option<Arc<ScriptFn>>,
    requests: Mutex<Vec<RunRequest>>,
    connected_keys: Mutex<Vec<String>>,
    closes: AtomicUsize,
    event_delay: Option<Duration>,
}

/// Agent runtime fake driven by queued runs.
///
/// Each `run` call takes the next queued run. With the queue empty it falls
/// back to the script closure, and without one it replies `"ok"` and
/// completes the turn.
#[derive(Clone)]
pub struct ScriptedRuntime {
    shared: Arc<Shared>,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Answer every run by calling `script` with the request.
    pub fn with_script<F>(script: F) -> Self
    where
        F: Fn(&RunRequest) -> Vec<HarnessResult<StepEvent>> + Send + Sync + 'static,
    {
        Self::build(Some(Arc::new(script)), None)
    }

    /// Sleep before yielding each event.
    #[must_use]
    pub fn with_event_delay(self, delay: Duration) -> Self {
        let script = self.shared.script.clone();
        let runtime = Self::build(script, Some(delay));
        {
            let mut from = self.shared.runs.lock().expect("runs mutex poisoned");
            let mut to = runtime.shared.runs.lock().expect("runs mutex poisoned");
            to.extend(from.drain(..));
        }
        runtime
    }

    fn build(script: Option<Arc<ScriptFn>>, event_delay: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                runs: Mutex::new(VecDeque::new()),
                script,
                requests: Mutex::new(Vec::new()),
                connected_keys: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
                event_delay,
            }),
        }
    }

    /// Queue the events for one future run.
    pub fn push_run(&self, events: Vec<HarnessResult<StepEvent>>) {
        self.push(ScriptedRun::Events {
            events,
            hang: false,
        });
    }

    /// Queue a run that never finishes after its events, until canceled.
    pub fn push_hanging_run(&self, events: Vec<HarnessResult<StepEvent>>) {
        self.push(ScriptedRun::Events { events, hang: true });
    }

    /// Queue a run whose invocation fails before producing a stream.
    pub fn push_run_error(&self, reason: impl Into<String>) {
        self.push(ScriptedRun::Fail(reason.into()));
    }

    fn push(&self, run: ScriptedRun) {
        self.shared
            .runs
            .lock()
            .expect("runs mutex poisoned")
            .push_back(run);
    }

    /// Requests received so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<RunRequest> {
        self.shared
            .requests
            .lock()
            .expect("requests mutex poisoned")
            .clone()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared
            .connected_keys
            .lock()
            .expect("connect mutex poisoned")
            .len()
    }

    /// Conversation keys clients were opened for, in order.
    #[must_use]
    pub fn connected_keys(&self) -> Vec<String> {
        self.shared
            .connected_keys
            .lock()
            .expect("connect mutex poisoned")
            .clone()
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Reply text followed by a plain turn completion.
    #[must_use]
    pub fn reply(text: &str, cost_usd: f64) -> Vec<HarnessResult<StepEvent>> {
        vec![
            Ok(StepEvent::assistant(1, text)),
            Ok(StepEvent::turn_complete(1, usage(cost_usd))),
        ]
    }
}

/// Usage record with the given cost and a few tokens.
#[must_use]
pub fn usage(cost_usd: f64) -> TurnUsage {
    TurnUsage {
        session_id: Some("runtime-session".to_string()),
        total_cost_usd: Some(cost_usd),
        input_tokens: 100,
        output_tokens: 20,
        duration_ms: 5,
        num_turns: 1,
        ..TurnUsage::default()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn connect(
        &self,
        conversation_key: &str,
        _options: &AgentOptions,
    ) -> HarnessResult<Box<dyn RuntimeClient>> {
        self.shared
            .connected_keys
            .lock()
            .expect("connect mutex poisoned")
            .push(conversation_key.to_string());
        Ok(Box::new(ScriptedClient {
            shared: Arc::clone(&self.shared),
            conversation_key: conversation_key.to_string(),
            closed: false,
        }))
    }
}

struct ScriptedClient {
    shared: Arc<Shared>,
    conversation_key: String,
    closed: bool,
}

#[async_trait]
impl RuntimeClient for ScriptedClient {
    async fn run(&mut self, request: RunRequest) -> HarnessResult<StepStream> {
        if self.closed {
            return Err(HarnessError::RuntimeClosed {
                conversation_key: self.conversation_key.clone(),
            });
        }

        let queued = self
            .shared
            .runs
            .lock()
            .expect("runs mutex poisoned")
            .pop_front();
        let run = match queued {
            Some(run) => run,
            None => ScriptedRun::Events {
                events: match &self.shared.script {
                    Some(script) => script(&request),
                    None => ScriptedRuntime::reply("ok", 0.0),
                },
                hang: false,
            },
        };

        let cancel = request.cancel.clone();
        self.shared
            .requests
            .lock()
            .expect("requests mutex poisoned")
            .push(request);

        let (events, hang) = match run {
            ScriptedRun::Fail(reason) => return Err(HarnessError::runtime(reason)),
            ScriptedRun::Events { events, hang } => (events, hang),
        };

        let delay = self.shared.event_delay;
        let events = stream::iter(events).then(move |event| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            event
        });
        let events = if hang {
            events.chain(stream::pending()).boxed()
        } else {
            events.boxed()
        };
        Ok(events
            .take_until(async move { cancel.cancelled().await })
            .boxed())
    }

    async fn close(&mut self) -> HarnessResult<()> {
        if !self.closed {
            self.closed = true;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// How a recording hook behaves when called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookBehavior {
    #[default]
    Succeed,
    Fail,
    Panic,
}

/// Step observer that records what it saw.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    seen: Arc<Mutex<Vec<(StepEvent, Directive)>>>,
    behavior: HookBehavior,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then fails or panics as asked.
    #[must_use]
    pub fn misbehaving(behavior: HookBehavior) -> Self {
        Self {
            seen: Arc::default(),
            behavior,
        }
    }

    #[must_use]
    pub fn seen(&self) -> Vec<(StepEvent, Directive)> {
        self.seen.lock().expect("observer mutex poisoned").clone()
    }
}

#[async_trait]
impl StepObserver for RecordingObserver {
    async fn on_step(&self, event: &StepEvent, directive: &Directive) -> HarnessResult<()> {
        self.seen
            .lock()
            .expect("observer mutex poisoned")
            .push((event.clone(), directive.clone()));
        match self.behavior {
            HookBehavior::Succeed => Ok(()),
            HookBehavior::Fail => Err(HarnessError::Internal {
                component: "observer".into(),
                reason: "recording observer told to fail".into(),
            }),
            HookBehavior::Panic => panic!("recording observer told to panic"),
        }
    }
}

/// Telemetry callback that records every execution.
#[derive(Clone, Default)]
pub struct RecordingTelemetry {
    seen: Arc<Mutex<Vec<ExecutionMetrics>>>,
    behavior: HookBehavior,
}

impl RecordingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn misbehaving(behavior: HookBehavior) -> Self {
        Self {
            seen: Arc::default(),
            behavior,
        }
    }

    #[must_use]
    pub fn seen(&self) -> Vec<ExecutionMetrics> {
        self.seen.lock().expect("telemetry mutex poisoned").clone()
    }
}

#[async_trait]
impl TelemetryCallback for RecordingTelemetry {
    async fn on_execution(&self, metrics: &ExecutionMetrics) -> HarnessResult<()> {
        self.seen
            .lock()
            .expect("telemetry mutex poisoned")
            .push(metrics.clone());
        match self.behavior {
            HookBehavior::Succeed => Ok(()),
            HookBehavior::Fail => Err(HarnessError::Internal {
                component: "telemetry".into(),
                reason: "recording telemetry told to fail".into(),
            }),
            HookBehavior::Panic => panic!("recording telemetry told to panic"),
        }
    }
}
