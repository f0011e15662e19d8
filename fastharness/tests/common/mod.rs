#![allow(dead_code)]

use fastharness::a2a::{Artifact, Task};
use fastharness::runtime::{RunRequest, StepEvent};
use fastharness::session::ExchangeRole;
use fastharness::test_support::{usage, ScriptedRuntime};
use fastharness::{Harness, HarnessConfig, HarnessResult};

/// Runtime that greets by name when an earlier exchange introduced one.
pub fn name_remembering_runtime() -> ScriptedRuntime {
    ScriptedRuntime::with_script(|request: &RunRequest| {
        let introduced = request
            .history
            .iter()
            .flat_map(|exchange| exchange.entries())
            .filter(|entry| entry.role == ExchangeRole::User)
            .find_map(|entry| entry.content.strip_prefix("My name is ").map(str::to_string));

        let reply = match (request.prompt.as_str(), introduced) {
            ("What is my name?", Some(name)) => format!("Your name is {name}."),
            ("What is my name?", None) => "I don't know your name yet.".to_string(),
            (prompt, _) => match prompt.strip_prefix("My name is ") {
                Some(name) => format!("Nice to meet you, {name}!"),
                None => "ok".to_string(),
            },
        };
        reply_events(&reply, 0.01)
    })
}

pub fn reply_events(text: &str, cost_usd: f64) -> Vec<HarnessResult<StepEvent>> {
    vec![
        Ok(StepEvent::assistant(1, text)),
        Ok(StepEvent::turn_complete(1, usage(cost_usd))),
    ]
}

pub fn harness(runtime: ScriptedRuntime) -> Harness {
    Harness::builder(runtime)
        .build()
        .expect("default configuration is valid")
}

pub fn harness_with(runtime: ScriptedRuntime, config: HarnessConfig) -> Harness {
    Harness::builder(runtime)
        .config(config)
        .build()
        .expect("test configuration is valid")
}

/// Text of every text part across the task's artifacts.
pub fn artifact_text(task: &Task) -> String {
    task.artifacts
        .iter()
        .flat_map(|artifact: &Artifact| artifact.parts.iter())
        .filter_map(|part| part.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn artifact_ids(task: &Task) -> Vec<&str> {
    task.artifacts
        .iter()
        .map(|artifact| artifact.artifact_id.as_str())
        .collect()
}
