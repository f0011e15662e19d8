//! Top-level coordination of one task run.
//!
//! [`Harness::submit`] leases the conversation's session, streams the agent
//! runtime's events through the translator into the task state machine, and
//! feeds turn usage to the cost tracker. Each accepted change is persisted
//! and published before the next event is read, so subscribers see events in
//! runtime order.

mod builder;

pub use builder::HarnessBuilder;

use crate::errors::{HarnessError, HarnessResult};
use crate::observability::semantic_conventions::{attr, span};
use crate::observer::{run_isolated, StepObserver};
use crate::runtime::{AgentOptions, AgentRuntime, RunRequest, StepEvent, StepKind};
use crate::session::{Exchange, SessionLease, SessionPool};
use crate::task::status_mapper::{can_continue, create_status_update_event, is_terminal_state};
use crate::task::{ErrorDetail, TaskEvent, TaskEventBus, TaskEventReceiver, TaskStateMachine, TaskStore};
use crate::telemetry::{
    CostTracker, ExecutionMetrics, ExecutionStatus, TelemetryCallback, ThresholdLevel,
};
use crate::translator::{Directive, EventTranslator, TaskRef};
use a2a_types::{Message, Task, TaskState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// One incoming user message.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Follow-ups to an `input-required` task reuse its id. A fresh id is
    /// generated when absent.
    pub task_id: Option<String>,
    /// Protocol context. Ignored when resuming; generated when absent.
    pub context_id: Option<String>,
    /// Selects the conversation session whose history the run sees.
    pub conversation_key: String,
    pub message: Message,
}

impl SubmitRequest {
    pub fn new(conversation_key: impl Into<String>, message: Message) -> Self {
        Self {
            task_id: None,
            context_id: None,
            conversation_key: conversation_key.into(),
            message,
        }
    }

    /// A plain text user message.
    pub fn text(conversation_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(conversation_key, Message::user_text(text))
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    #[must_use]
    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }
}

/// How a run ended when the runtime did not fail.
enum RunOutcome {
    Finished { response: String },
    Canceled,
}

/// Assistant text seen during a run.
#[derive(Default)]
struct ReplyText {
    last_message: Option<String>,
    streamed: String,
    result: Option<String>,
}

impl ReplyText {
    fn observe(&mut self, kind: &StepKind) {
        match kind {
            StepKind::AssistantMessage { text, partial: true } => self.streamed.push_str(text),
            StepKind::AssistantMessage { text, partial: false } => {
                self.streamed.clear();
                self.last_message = Some(text.clone());
            }
            StepKind::TurnComplete {
                result: Some(result),
                ..
            } => self.result = Some(result.clone()),
            _ => {}
        }
    }

    /// The final assistant message, else the runtime's result text, else
    /// whatever was streamed.
    fn into_response(self) -> String {
        self.last_message
            .or(self.result)
            .unwrap_or(self.streamed)
    }
}

/// Removes the task from the running set however `submit` exits.
struct RunningGuard<'a> {
    running: &'a DashMap<String, CancellationToken>,
    task_id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.task_id);
    }
}

/// Bridges an [`AgentRuntime`] to A2A tasks.
pub struct Harness {
    runtime: Arc<dyn AgentRuntime>,
    sessions: Arc<SessionPool>,
    tracker: Arc<CostTracker>,
    store: Arc<dyn TaskStore>,
    events: Arc<TaskEventBus>,
    translator: EventTranslator,
    observers: Vec<Arc<dyn StepObserver>>,
    callbacks: Vec<Arc<dyn TelemetryCallback>>,
    options: AgentOptions,
    abort_on_error_threshold: bool,
    running: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Harness {
    pub fn builder(runtime: impl AgentRuntime + 'static) -> HarnessBuilder {
        HarnessBuilder::new(runtime)
    }

    /// Start the background session sweeper. Calling it again is a no-op.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_none() {
            *sweeper = Some(self.sessions.spawn_sweeper());
            info!(model = %self.options.model, "Harness started");
        }
    }

    /// Run one user message to a terminal or `input-required` task.
    ///
    /// A runtime failure fails the task, stores it, and is returned as
    /// [`HarnessError::RuntimeInvocation`]; the failed task stays available
    /// through [`get_task`](Self::get_task). A lock timeout creates no task.
    #[tracing::instrument(
        name = "invoke_agent",
        skip(self, request),
        fields(
            gen_ai.operation.name = tracing::field::Empty,
            gen_ai.request.model = tracing::field::Empty,
            gen_ai.conversation.id = tracing::field::Empty,
            task.id = tracing::field::Empty,
            context.id = tracing::field::Empty,
            task.state = tracing::field::Empty,
        )
    )]
    pub async fn submit(&self, request: SubmitRequest) -> HarnessResult<Task> {
        let SubmitRequest {
            task_id,
            context_id,
            conversation_key,
            message,
        } = request;
        let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let invoke = Span::current();
        invoke.record(attr::OPERATION_NAME, span::INVOKE_AGENT);
        invoke.record(attr::REQUEST_MODEL, self.options.model.as_str());
        invoke.record(attr::CONVERSATION_ID, conversation_key.as_str());
        invoke.record(attr::TASK_ID, task_id.as_str());

        if self.shutdown.is_cancelled() {
            return Err(HarnessError::PoolClosed);
        }
        if self.running.contains_key(&task_id) {
            return Err(HarnessError::TaskAlreadyRunning { task_id });
        }

        let mut lease = self.sessions.acquire(&conversation_key).await?;

        let cancel = self.shutdown.child_token();
        match self.running.entry(task_id.clone()) {
            Entry::Occupied(_) => return Err(HarnessError::TaskAlreadyRunning { task_id }),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let _running = RunningGuard {
            running: &self.running,
            task_id: task_id.clone(),
        };

        let prompt = message.text();
        let mut machine = self.open_task(&task_id, context_id, message).await?;
        invoke.record(attr::CONTEXT_ID, machine.task().context_id.as_str());

        let run = RunRequest {
            task_id: task_id.clone(),
            prompt: prompt.clone(),
            history: lease.history().to_vec(),
            options: self.options.clone(),
            cancel,
        };

        match self.drive(&mut lease, &mut machine, run).await {
            Ok(RunOutcome::Finished { response }) => {
                lease.append_exchange(Exchange::new(&task_id, prompt, response));
            }
            Ok(RunOutcome::Canceled) => {
                let event = machine.cancel()?;
                self.emit(&machine, event).await?;
                info!(task_id = %task_id, "Task canceled");
            }
            Err(err) => {
                let err = match err {
                    err @ HarnessError::RuntimeInvocation { .. } => err,
                    other => HarnessError::runtime(other.summary()),
                };
                error!(task_id = %task_id, error = %err, "Agent run failed");
                if !machine.is_terminal() {
                    let event = machine.fail(ErrorDetail::from(&err))?;
                    self.emit(&machine, event).await?;
                }
                invoke.record(attr::TASK_STATE, machine.state().as_str());
                lease.release();
                return Err(err);
            }
        }

        let stamp = lease.release();
        invoke.record(attr::TASK_STATE, machine.state().as_str());
        tracing::debug!(task_id = %task_id, last_accessed = ?stamp, "Released session");
        Ok(machine.into_task())
    }

    /// Create the task, or resume it when it is waiting for input.
    async fn open_task(
        &self,
        task_id: &str,
        context_id: Option<String>,
        message: Message,
    ) -> HarnessResult<TaskStateMachine> {
        if let Some(task) = self.store.get_task(task_id).await? {
            let state = task.status.state;
            if !can_continue(state) {
                return Err(HarnessError::InvalidStateTransition {
                    from: state,
                    to: TaskState::Working,
                });
            }
            let mut machine = TaskStateMachine::from_task(task);
            for event in machine.resume(message)? {
                self.emit(&machine, event).await?;
            }
            info!(task_id = %task_id, "Resuming task");
            return Ok(machine);
        }

        let context_id = context_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut machine = TaskStateMachine::new(task_id, context_id);
        let submitted = TaskEvent::StatusUpdate(create_status_update_event(
            task_id,
            &machine.task().context_id,
            machine.task().status.clone(),
            false,
        ));
        self.emit(&machine, submitted).await?;
        let said = machine.record_message(message);
        self.emit(&machine, said).await?;
        let started = machine.start()?;
        self.emit(&machine, started).await?;
        Ok(machine)
    }

    /// Stream one run inside a `chat` span.
    async fn drive(
        &self,
        lease: &mut SessionLease,
        machine: &mut TaskStateMachine,
        run: RunRequest,
    ) -> HarnessResult<RunOutcome> {
        let chat = info_span!(
            span::CHAT,
            gen_ai.operation.name = tracing::field::Empty,
            gen_ai.request.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            fastharness.cost_usd = tracing::field::Empty,
        );
        chat.record(attr::OPERATION_NAME, span::CHAT);
        chat.record(attr::REQUEST_MODEL, self.options.model.as_str());
        self.stream_run(lease, machine, run).instrument(chat).await
    }

    /// Stream one run through translation and the state machine.
    async fn stream_run(
        &self,
        lease: &mut SessionLease,
        machine: &mut TaskStateMachine,
        run: RunRequest,
    ) -> HarnessResult<RunOutcome> {
        let cancel = run.cancel.clone();
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Canceled);
        }

        let mut stream = lease
            .client(self.runtime.as_ref(), &self.options)
            .await?
            .run(run)
            .await?;

        let mut reply = ReplyText::default();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(RunOutcome::Canceled),
                next = stream.next() => next,
            };
            let Some(event) = next else { break };
            let event = event?;
            reply.observe(&event.kind);
            if let Some(usage) = event.usage() {
                let chat = Span::current();
                chat.record(attr::USAGE_INPUT_TOKENS, usage.input_tokens);
                chat.record(attr::USAGE_OUTPUT_TOKENS, usage.output_tokens);
            }
            self.handle_step(machine, &event, &cancel).await?;
        }

        // The reply goes out before the final status so that status stays last.
        let response = reply.into_response();
        if !response.is_empty() {
            let event = machine.record_message(Message::agent_text(response.clone()));
            self.emit(machine, event).await?;
        }
        if machine.state() == TaskState::Working {
            let message = (!response.is_empty()).then(|| response.clone());
            let event = machine.complete(message)?;
            self.emit(machine, event).await?;
        }
        Ok(RunOutcome::Finished { response })
    }

    async fn handle_step(
        &self,
        machine: &mut TaskStateMachine,
        event: &StepEvent,
        cancel: &CancellationToken,
    ) -> HarnessResult<()> {
        let task_id = machine.task().id.clone();
        let directives = self.translator.translate(
            event,
            TaskRef {
                task_id: &task_id,
                context_id: &machine.task().context_id,
            },
        );

        if let StepKind::ToolCall { id, name, .. } = &event.kind {
            let tool = info_span!(
                span::EXECUTE_TOOL,
                gen_ai.operation.name = tracing::field::Empty,
                gen_ai.tool.name = tracing::field::Empty,
                gen_ai.tool.call.id = tracing::field::Empty,
            );
            tool.record(attr::OPERATION_NAME, span::EXECUTE_TOOL);
            tool.record(attr::TOOL_NAME, name.as_str());
            tool.record(attr::TOOL_CALL_ID, id.as_str());
            self.apply_directives(machine, event, directives)
                .instrument(tool)
                .await?;
        } else {
            self.apply_directives(machine, event, directives).await?;
        }

        if let StepKind::TurnComplete {
            usage,
            is_error,
            result,
            ..
        } = &event.kind
        {
            let status = if *is_error {
                ExecutionStatus::Error
            } else {
                ExecutionStatus::Success
            };
            let metrics = ExecutionMetrics::from_usage(&task_id, usage, status);
            Span::current().record(attr::COST_USD, metrics.total_cost_usd);
            let signals = self.tracker.record(metrics.clone());
            for callback in &self.callbacks {
                run_isolated("telemetry", &task_id, callback.on_execution(&metrics)).await;
            }

            if self.abort_on_error_threshold
                && signals.iter().any(|s| s.level == ThresholdLevel::Error)
            {
                warn!(task_id = %task_id, "Cost error threshold reached; canceling run");
                cancel.cancel();
            }
            if *is_error {
                return Err(HarnessError::runtime(
                    result.as_deref().unwrap_or("agent reported an error"),
                ));
            }
        }
        Ok(())
    }

    /// Apply each directive, then show it to the observers.
    async fn apply_directives(
        &self,
        machine: &mut TaskStateMachine,
        event: &StepEvent,
        directives: Vec<Directive>,
    ) -> HarnessResult<()> {
        let task_id = machine.task().id.clone();
        for directive in directives {
            if let Some(update) = machine.apply(directive.clone()) {
                self.emit(machine, update).await?;
            }
            for observer in &self.observers {
                run_isolated("observer", &task_id, observer.on_step(event, &directive)).await;
            }
        }
        Ok(())
    }

    /// Persist the snapshot and the event, then fan the event out. Subscriber
    /// streams end after a terminal status.
    async fn emit(&self, machine: &TaskStateMachine, event: TaskEvent) -> HarnessResult<()> {
        self.store.add_task_event(&event).await?;
        self.store.save_task(machine.task()).await?;
        self.events.publish(&event);
        if let TaskEvent::StatusUpdate(update) = &event {
            if is_terminal_state(update.status.state) {
                self.events.close(&update.task_id);
            }
        }
        Ok(())
    }

    /// Cancel a task.
    ///
    /// A running task is signaled and stops at its next suspension point; the
    /// returned snapshot may still show it working. A task waiting for input
    /// (or not yet started) is canceled immediately, and a resume racing that
    /// cancel is refused.
    pub async fn cancel(&self, task_id: &str) -> HarnessResult<Task> {
        // Holding the running entry makes a concurrent resume fail with
        // TaskAlreadyRunning until the cancel is stored.
        let claim = match self.running.entry(task_id.to_string()) {
            Entry::Occupied(run) => {
                run.get().cancel();
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(CancellationToken::new());
                Some(RunningGuard {
                    running: &self.running,
                    task_id: task_id.to_string(),
                })
            }
        };
        let Some(_claim) = claim else {
            info!(task_id = %task_id, "Cancellation requested");
            return self.get_task(task_id).await;
        };

        let task = self.get_task(task_id).await?;
        let state = task.status.state;
        if is_terminal_state(state) {
            return Err(HarnessError::TaskNotCancelable {
                task_id: task_id.to_string(),
                state,
            });
        }

        let mut machine = TaskStateMachine::from_task(task);
        let event = machine.cancel()?;
        self.emit(&machine, event).await?;
        info!(task_id = %task_id, from = %state, "Task canceled");
        Ok(machine.into_task())
    }

    /// Latest snapshot of a task.
    pub async fn get_task(&self, task_id: &str) -> HarnessResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| HarnessError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    pub async fn list_tasks(&self, context_id: Option<&str>) -> HarnessResult<Vec<Task>> {
        self.store.list_tasks(context_id).await
    }

    /// Every event recorded for a task, oldest first.
    pub async fn task_events(&self, task_id: &str) -> HarnessResult<Vec<TaskEvent>> {
        self.store.get_task_events(task_id).await
    }

    /// Live events of a task from now on.
    #[must_use]
    pub fn subscribe(&self, task_id: &str) -> TaskEventReceiver {
        self.events.subscribe(task_id)
    }

    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        self.running.contains_key(task_id)
    }

    #[must_use]
    pub const fn telemetry(&self) -> &Arc<CostTracker> {
        &self.tracker
    }

    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionPool> {
        &self.sessions
    }

    #[must_use]
    pub const fn translator(&self) -> &EventTranslator {
        &self.translator
    }

    #[must_use]
    pub const fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Cancel running tasks, stop the sweeper and close every session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let closed = self.sessions.shutdown().await;
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Session sweeper ended abnormally");
            }
        }
        info!(
            sessions_closed = closed,
            usage = %self.tracker.summary(),
            "Harness shut down"
        );
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("sessions", &self.sessions)
            .field("running", &self.running.len())
            .field("observers", &self.observers.len())
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}
