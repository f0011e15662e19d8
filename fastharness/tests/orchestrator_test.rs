//! Orchestration lifecycle tests
//!
//! Event ordering, hook isolation, cancellation, input-required resumption,
//! lock timeouts and the cost abort policy, all against the scripted runtime.

use fastharness::a2a::{MessageRole, TaskState};
use fastharness::config::{SessionConfig, TelemetryConfig};
use fastharness::errors::HarnessError;
use fastharness::runtime::{StepEvent, StepKind};
use async_trait::async_trait;
use fastharness::a2a::Task;
use fastharness::task::{InMemoryTaskStore, TaskEvent, TaskStore};
use fastharness::telemetry::{ExecutionStatus, ThresholdLevel};
use fastharness::test_support::{
    usage, HookBehavior, RecordingObserver, RecordingTelemetry, ScriptedRuntime,
};
use fastharness::{Harness, HarnessConfig, HarnessResult, SubmitRequest};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

mod common;
use common::{artifact_ids, artifact_text, harness, harness_with, reply_events};

/// Wait until the task has produced its first artifact.
async fn first_artifact(events: &mut fastharness::task::TaskEventReceiver) {
    loop {
        match events.recv().await {
            Some(TaskEvent::ArtifactUpdate(_)) => return,
            Some(_) => {}
            None => panic!("event stream ended before any artifact"),
        }
    }
}

#[tokio::test]
async fn test_artifacts_follow_runtime_event_order() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    let mut done = StepEvent::turn_complete(2, usage(0.02));
    if let StepKind::TurnComplete {
        structured_output, ..
    } = &mut done.kind
    {
        *structured_output = Some(json!({"files": 2}));
    }
    runtime.push_run(vec![
        Ok(StepEvent::tool_call(1, "toolu_1", "Glob", json!({"pattern": "*.rs"}))),
        Ok(StepEvent::tool_result(1, "toolu_1", json!(["a.rs", "b.rs"]))),
        Ok(StepEvent::turn_complete(1, usage(0.01))),
        Ok(StepEvent::assistant_chunk(2, "Found ")),
        Ok(StepEvent::assistant_chunk(2, "two")),
        Ok(StepEvent::assistant(2, "Found two files.")),
        Ok(done),
    ]);
    let harness = harness(runtime);

    let task = harness
        .submit(SubmitRequest::text("conv-A", "List the Rust files").with_task_id("T1"))
        .await?;

    assert_eq!(task.status.state, TaskState::Completed);
    assert_eq!(
        artifact_ids(&task),
        vec![
            "tool-use-toolu_1",
            "tool-result-toolu_1",
            "assistant-turn-2",
            "structured-output-turn-2"
        ]
    );
    assert_eq!(artifact_text(&task), "Found two files.");
    assert_eq!(harness.telemetry().execution_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_subscribers_see_events_in_order_ending_with_final_status() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(reply_events("hello there", 0.01));
    let harness = harness(runtime);

    let mut events = harness.subscribe("T1");
    harness
        .submit(SubmitRequest::text("conv-A", "hi").with_task_id("T1"))
        .await?;

    // The stream ends on its own once the terminal status is out.
    let received = tokio::time::timeout(Duration::from_secs(1), async {
        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            received.push(event);
        }
        received
    })
    .await
    .expect("subscriber stream ends after the final status");
    let labels: Vec<String> = received
        .iter()
        .map(|event| match event {
            TaskEvent::StatusUpdate(update) => format!("status:{}", update.status.state),
            TaskEvent::ArtifactUpdate(update) => format!("artifact:{}", update.artifact.artifact_id),
            TaskEvent::Message(message) => format!("message:{:?}", message.role),
        })
        .collect();
    assert_eq!(
        labels,
        vec![
            "status:submitted",
            "message:User",
            "status:working",
            "artifact:assistant-turn-1",
            "message:Agent",
            "status:completed",
        ]
    );
    assert!(received.last().is_some_and(TaskEvent::is_final));
    assert_eq!(harness.task_events("T1").await?, received);
    Ok(())
}

#[tokio::test]
async fn test_failing_observers_and_callbacks_do_not_affect_the_task() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(reply_events("done", 0.05));
    let observer = RecordingObserver::new();
    let telemetry = RecordingTelemetry::new();
    let harness = Harness::builder(runtime)
        .observer(RecordingObserver::misbehaving(HookBehavior::Panic))
        .observer(RecordingObserver::misbehaving(HookBehavior::Fail))
        .observer(observer.clone())
        .telemetry_callback(RecordingTelemetry::misbehaving(HookBehavior::Panic))
        .telemetry_callback(telemetry.clone())
        .build()?;

    let task = harness
        .submit(SubmitRequest::text("conv-A", "go").with_task_id("T1"))
        .await?;

    assert_eq!(task.status.state, TaskState::Completed);
    // one call per directive: the text artifact, then the working status
    let seen = observer.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1.label(), "artifact-append");
    assert_eq!(seen[1].1.label(), "status-update");

    let executions = telemetry.seen();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].task_id, "T1");
    assert_eq!(executions[0].status, ExecutionStatus::Success);
    Ok(())
}

#[tokio::test]
async fn test_cancel_running_task_stops_at_next_event() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_hanging_run(vec![Ok(StepEvent::tool_call(
        1,
        "toolu_1",
        "Bash",
        json!({"command": "sleep 600"}),
    ))]);
    let harness = Arc::new(harness(runtime.clone()));

    let mut events = harness.subscribe("T1");
    let runner = Arc::clone(&harness);
    let run = tokio::spawn(async move {
        runner
            .submit(SubmitRequest::text("conv-A", "long job").with_task_id("T1"))
            .await
    });

    first_artifact(&mut events).await;
    assert!(harness.is_running("T1"));
    let duplicate = harness
        .submit(SubmitRequest::text("conv-A", "again").with_task_id("T1"))
        .await;
    assert!(matches!(
        duplicate,
        Err(ref err @ HarnessError::TaskAlreadyRunning { .. }) if err.is_retryable()
    ));

    harness.cancel("T1").await?;
    let task = run.await.expect("submit task panicked")?;

    assert_eq!(task.status.state, TaskState::Canceled);
    assert_eq!(artifact_ids(&task), vec!["tool-use-toolu_1"]);
    assert!(!harness.is_running("T1"));
    assert!(runtime.requests()[0].cancel.is_cancelled());
    assert_eq!(harness.sessions().history("conv-A").await.map(|h| h.len()), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_input_required_then_resume_on_same_task() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(vec![
        Ok(StepEvent::assistant(1, "Which file should I read?")),
        Ok(StepEvent::input_required(1, usage(0.01))),
    ]);
    runtime.push_run(reply_events("src/lib.rs declares eleven modules.", 0.02));
    let harness = harness(runtime.clone());

    let waiting = harness
        .submit(
            SubmitRequest::text("conv-A", "Summarize a file")
                .with_task_id("T1")
                .with_context_id("ctx-1"),
        )
        .await?;
    assert_eq!(waiting.status.state, TaskState::InputRequired);

    let done = harness
        .submit(
            SubmitRequest::text("conv-A", "src/lib.rs")
                .with_task_id("T1")
                .with_context_id("ignored"),
        )
        .await?;

    assert_eq!(done.status.state, TaskState::Completed);
    assert_eq!(done.context_id, "ctx-1");
    assert_eq!(
        artifact_ids(&done),
        vec!["assistant-turn-1", "assistant-turn-1-2"]
    );
    let roles: Vec<_> = done.history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Agent,
            MessageRole::User,
            MessageRole::Agent
        ]
    );
    // the question and its answer both count as exchanges
    assert_eq!(runtime.requests()[1].history.len(), 1);

    let again = harness
        .submit(SubmitRequest::text("conv-A", "more").with_task_id("T1"))
        .await;
    assert!(matches!(
        again,
        Err(HarnessError::InvalidStateTransition {
            from: TaskState::Completed,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn test_second_streamed_message_in_a_turn_keeps_its_own_artifact() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(vec![
        Ok(StepEvent::assistant_chunk(1, "Let me ")),
        Ok(StepEvent::assistant(1, "Let me look.")),
        Ok(StepEvent::tool_call(1, "a", "Read", json!({"path": "notes.md"}))),
        Ok(StepEvent::assistant_chunk(1, "Your ")),
        Ok(StepEvent::assistant_chunk(1, "name ")),
        Ok(StepEvent::assistant_chunk(1, "is Alice.")),
        Ok(StepEvent::assistant(1, "Your name is Alice.")),
        Ok(StepEvent::turn_complete(1, usage(0.01))),
    ]);
    let harness = harness(runtime);

    let task = harness
        .submit(SubmitRequest::text("conv-A", "What is my name?").with_task_id("T1"))
        .await?;

    assert_eq!(
        artifact_ids(&task),
        vec!["assistant-turn-1", "tool-use-a", "assistant-turn-1-2"]
    );
    assert_eq!(artifact_text(&task), "Let me look.\nYour name is Alice.");
    let history = harness.sessions().history("conv-A").await.expect("session");
    assert_eq!(history[0].response, "Your name is Alice.");
    Ok(())
}

#[tokio::test]
async fn test_streamed_reply_after_resume_replaces_its_chunks() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(vec![
        Ok(StepEvent::assistant_chunk(1, "Which ")),
        Ok(StepEvent::assistant(1, "Which file?")),
        Ok(StepEvent::input_required(1, usage(0.01))),
    ]);
    runtime.push_run(vec![
        Ok(StepEvent::assistant_chunk(1, "It declares ")),
        Ok(StepEvent::assistant_chunk(1, "eleven modules")),
        Ok(StepEvent::assistant(1, "It declares eleven modules.")),
        Ok(StepEvent::turn_complete(1, usage(0.01))),
    ]);
    let harness = harness(runtime);

    harness
        .submit(SubmitRequest::text("conv-A", "Summarize a file").with_task_id("T1"))
        .await?;
    let done = harness
        .submit(SubmitRequest::text("conv-A", "src/lib.rs").with_task_id("T1"))
        .await?;

    assert_eq!(done.status.state, TaskState::Completed);
    assert_eq!(
        artifact_ids(&done),
        vec!["assistant-turn-1", "assistant-turn-1-2"]
    );
    assert_eq!(artifact_text(&done), "Which file?\nIt declares eleven modules.");
    Ok(())
}

/// In-memory store whose next `get_task` waits to be released once armed.
#[derive(Default)]
struct GatedStore {
    inner: InMemoryTaskStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TaskStore for GatedStore {
    async fn get_task(&self, task_id: &str) -> HarnessResult<Option<Task>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get_task(task_id).await
    }

    async fn save_task(&self, task: &Task) -> HarnessResult<()> {
        self.inner.save_task(task).await
    }

    async fn add_task_event(&self, event: &TaskEvent) -> HarnessResult<()> {
        self.inner.add_task_event(event).await
    }

    async fn get_task_events(&self, task_id: &str) -> HarnessResult<Vec<TaskEvent>> {
        self.inner.get_task_events(task_id).await
    }

    async fn list_tasks(&self, context_id: Option<&str>) -> HarnessResult<Vec<Task>> {
        self.inner.list_tasks(context_id).await
    }
}

#[tokio::test]
async fn test_resume_racing_cancel_of_parked_task_is_refused() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(vec![Ok(StepEvent::input_required(1, usage(0.0)))]);
    runtime.push_run(reply_events("resumed", 0.0));
    let store = Arc::new(GatedStore::default());
    let harness = Harness::builder(runtime.clone())
        .task_store(store.clone())
        .build()?;

    harness
        .submit(SubmitRequest::text("conv-A", "start").with_task_id("T1"))
        .await?;

    // Hold the cancel between reading the parked task and storing the result.
    store.armed.store(true, Ordering::SeqCst);
    let (canceled, resumed) = tokio::join!(harness.cancel("T1"), async {
        store.entered.notified().await;
        let resumed = harness
            .submit(SubmitRequest::text("conv-A", "go on").with_task_id("T1"))
            .await;
        store.release.notify_one();
        resumed
    });

    assert!(matches!(
        resumed,
        Err(HarnessError::TaskAlreadyRunning { .. })
    ));
    assert_eq!(canceled?.status.state, TaskState::Canceled);
    assert_eq!(runtime.requests().len(), 1);

    let states: Vec<_> = harness
        .task_events("T1")
        .await?
        .into_iter()
        .filter_map(|event| match event {
            TaskEvent::StatusUpdate(update) => Some(update.status.state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TaskState::Submitted,
            TaskState::Working,
            TaskState::InputRequired,
            TaskState::Canceled
        ]
    );
    assert!(!harness.is_running("T1"));
    Ok(())
}

#[tokio::test]
async fn test_cancel_parked_terminal_and_unknown_tasks() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(vec![Ok(StepEvent::input_required(1, usage(0.0)))]);
    let harness = harness(runtime);

    harness
        .submit(SubmitRequest::text("conv-A", "start").with_task_id("parked"))
        .await?;
    let canceled = harness.cancel("parked").await?;
    assert_eq!(canceled.status.state, TaskState::Canceled);
    assert_eq!(
        harness.get_task("parked").await?.status.state,
        TaskState::Canceled
    );

    assert!(matches!(
        harness.cancel("parked").await,
        Err(HarnessError::TaskNotCancelable {
            state: TaskState::Canceled,
            ..
        })
    ));
    assert!(matches!(
        harness.cancel("nope").await,
        Err(HarnessError::TaskNotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_lock_timeout_creates_no_task() -> HarnessResult<()> {
    let config = HarnessConfig {
        sessions: SessionConfig {
            lock_timeout_ms: 50,
            ..SessionConfig::default()
        },
        ..HarnessConfig::default()
    };
    let harness = harness_with(ScriptedRuntime::new(), config);

    let held = harness.sessions().acquire("conv-A").await?;
    let result = harness
        .submit(SubmitRequest::text("conv-A", "blocked").with_task_id("T1"))
        .await;
    assert!(matches!(
        result,
        Err(HarnessError::SessionLockTimeout { .. })
    ));
    assert!(matches!(
        harness.get_task("T1").await,
        Err(HarnessError::TaskNotFound { .. })
    ));
    held.release();

    let task = harness
        .submit(SubmitRequest::text("conv-A", "unblocked").with_task_id("T1"))
        .await?;
    assert_eq!(task.status.state, TaskState::Completed);
    Ok(())
}

#[tokio::test]
async fn test_cost_error_threshold_aborts_run_when_configured() -> HarnessResult<()> {
    let config = HarnessConfig {
        telemetry: TelemetryConfig {
            warn_threshold_usd: 0.5,
            error_threshold_usd: 1.0,
            abort_on_error_threshold: true,
        },
        ..HarnessConfig::default()
    };
    let runtime = ScriptedRuntime::new();
    runtime.push_hanging_run(vec![
        Ok(StepEvent::assistant(1, "Working on it")),
        Ok(StepEvent::turn_complete(1, usage(2.5))),
    ]);
    let harness = harness_with(runtime, config);
    let mut signals = harness.telemetry().subscribe();

    let task = harness
        .submit(SubmitRequest::text("conv-A", "expensive").with_task_id("T1"))
        .await?;

    assert_eq!(task.status.state, TaskState::Canceled);
    assert!(harness.telemetry().error_signaled());
    assert_eq!(signals.recv().await.ok().map(|s| s.level), Some(ThresholdLevel::Warn));
    assert_eq!(signals.recv().await.ok().map(|s| s.level), Some(ThresholdLevel::Error));
    Ok(())
}

#[tokio::test]
async fn test_cost_error_threshold_is_informational_by_default() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(reply_events("pricey", 12.0));
    runtime.push_run(reply_events("still pricey", 3.0));
    let harness = harness(runtime);

    let first = harness.submit(SubmitRequest::text("conv-A", "one")).await?;
    let second = harness.submit(SubmitRequest::text("conv-A", "two")).await?;

    assert_eq!(first.status.state, TaskState::Completed);
    assert_eq!(second.status.state, TaskState::Completed);
    // exactly one signal per level despite two records above both
    assert_eq!(harness.telemetry().signals().len(), 2);
    assert!((harness.telemetry().total_cost_usd() - 15.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_runtime_reported_error_fails_task_and_records_error_metrics() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    let mut failed_turn = StepEvent::turn_complete(1, usage(0.03));
    if let StepKind::TurnComplete {
        is_error, result, ..
    } = &mut failed_turn.kind
    {
        *is_error = true;
        *result = Some("max turns reached".into());
    }
    runtime.push_run(vec![Ok(failed_turn)]);
    let telemetry = RecordingTelemetry::new();
    let harness = Harness::builder(runtime)
        .telemetry_callback(telemetry.clone())
        .build()?;

    let err = harness
        .submit(SubmitRequest::text("conv-A", "loop forever").with_task_id("T1"))
        .await
        .expect_err("turn error");
    assert_eq!(err.to_string(), "Agent execution failed: max turns reached");
    assert_eq!(harness.get_task("T1").await?.status.state, TaskState::Failed);
    assert_eq!(telemetry.seen()[0].status, ExecutionStatus::Error);
    Ok(())
}

#[tokio::test]
async fn test_unrecognized_events_are_skipped() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    runtime.push_run(vec![
        Ok(StepEvent {
            turn: 1,
            kind: StepKind::Unrecognized {
                kind: "thinking".into(),
            },
        }),
        Ok(StepEvent::assistant(1, "answer")),
        Ok(StepEvent::turn_complete(1, usage(0.0))),
    ]);
    let harness = harness(runtime);

    let task = harness.submit(SubmitRequest::text("conv-A", "q")).await?;
    assert_eq!(task.status.state, TaskState::Completed);
    assert_eq!(artifact_text(&task), "answer");
    assert_eq!(harness.translator().unrecognized_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_conversations_run_independently() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new().with_event_delay(Duration::from_millis(5));
    let harness = Arc::new(harness(runtime.clone()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            harness
                .submit(SubmitRequest::text(format!("conv-{}", i % 4), format!("msg {i}")))
                .await
        }));
    }
    for handle in handles {
        let task = handle.await.expect("join")?;
        assert_eq!(task.status.state, TaskState::Completed);
    }

    assert_eq!(harness.sessions().len(), 4);
    assert_eq!(runtime.connect_count(), 4);
    for key in 0..4 {
        let history = harness
            .sessions()
            .history(&format!("conv-{key}"))
            .await
            .expect("session");
        assert_eq!(history.len(), 2);
    }
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_refuses_work() -> HarnessResult<()> {
    let runtime = ScriptedRuntime::new();
    let harness = harness(runtime.clone());
    harness.start();

    harness.submit(SubmitRequest::text("conv-A", "one")).await?;
    harness.submit(SubmitRequest::text("conv-B", "two")).await?;
    harness.shutdown().await;

    assert!(harness.sessions().is_shut_down());
    assert!(harness.sessions().is_empty());
    assert_eq!(runtime.close_count(), 2);
    assert!(matches!(
        harness.submit(SubmitRequest::text("conv-A", "three")).await,
        Err(HarnessError::PoolClosed)
    ));
    Ok(())
}
