//! Test-only helpers for building flows, engines, and scripted actions.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::actions::{Action, ActionContext, ActionOutcome, ActionRegistry};
use crate::flow::{
    ClarifyCondition, ClarifyRule, FlowContext, FlowDefinition, Question, Stage, StageKind,
    StopCondition,
};
use crate::io::config::EngineConfig;
use crate::io::flow_store::FlowStore;
use crate::turn::Engine;

/// Create a flow from stages and an initial slot template.
pub fn flow_of(stages: Vec<Stage>, slots: Value) -> FlowDefinition {
    FlowDefinition {
        flow_id: None,
        entry: None,
        stages,
        context: FlowContext { slots },
    }
}

pub fn stage(id: &str, kind: StageKind) -> Stage {
    Stage {
        id: id.to_string(),
        prompt: None,
        kind,
    }
}

pub fn message_stage(id: &str, next: &str) -> Stage {
    stage(
        id,
        StageKind::Message {
            next: next.to_string(),
        },
    )
}

pub fn action_stage(id: &str, action: &str, next: &str) -> Stage {
    stage(
        id,
        StageKind::Action {
            action: action.to_string(),
            save_to: None,
            next: next.to_string(),
        },
    )
}

pub fn question(id: &str, ask: &str, save_to: &str) -> Question {
    Question {
        id: id.to_string(),
        ask: ask.to_string(),
        save_to: save_to.to_string(),
        clarify_if: Vec::new(),
    }
}

/// A question that asks `follow_up` once when its answer meets `condition`.
pub fn question_with_clarify(
    id: &str,
    ask: &str,
    save_to: &str,
    condition: ClarifyCondition,
    follow_up: &str,
) -> Question {
    Question {
        clarify_if: vec![ClarifyRule {
            condition,
            follow_up: follow_up.to_string(),
        }],
        ..question(id, ask, save_to)
    }
}

pub fn questions_stage(id: &str, questions: Vec<Question>, next: &str) -> Stage {
    stage(
        id,
        StageKind::Questions {
            questions,
            next: next.to_string(),
        },
    )
}

pub fn confirm_stage(id: &str, summary_template: &str, on_yes: &str, on_no: &str) -> Stage {
    stage(
        id,
        StageKind::Confirm {
            ask: crate::flow::DEFAULT_CONFIRM_ASK.to_string(),
            summary_template: summary_template.to_string(),
            on_yes: on_yes.to_string(),
            on_no: on_no.to_string(),
        },
    )
}

pub fn loop_stage(id: &str, signal_slot: &str, on_stop: &str, next: &str) -> Stage {
    stage(
        id,
        StageKind::Loop {
            stop_condition: Some(StopCondition {
                signal_slot: Some(signal_slot.to_string()),
            }),
            on_stop: on_stop.to_string(),
            next: next.to_string(),
        },
    )
}

/// Engine serving a single in-memory flow with the built-in actions.
///
/// # Panics
/// Panics if `flow` fails validation.
pub fn engine_with_flow(flow_id: &str, flow: FlowDefinition) -> Engine {
    engine_with_config(flow_id, flow, EngineConfig::default())
}

/// Like [`engine_with_flow`], with an explicit config.
pub fn engine_with_config(flow_id: &str, flow: FlowDefinition, config: EngineConfig) -> Engine {
    let store = FlowStore::in_memory();
    store.insert(flow_id, flow).expect("valid test flow");
    Engine::new(store, ActionRegistry::with_builtins(), config)
}

/// The `flows/` directory shipped with the repository.
pub fn bundled_flows_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../flows"))
}

/// Engine over the bundled flows with default settings.
pub fn bundled_engine() -> Engine {
    Engine::from_config(EngineConfig {
        flows_dir: bundled_flows_dir(),
        ..EngineConfig::default()
    })
}

/// Temp directory holding an `interview.toml` whose `flows_dir` points at the
/// bundled flows. `extra` is appended verbatim.
pub fn temp_config(extra: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("interview.toml");
    let contents = format!(
        "flows_dir = '{}'\n{extra}",
        bundled_flows_dir().display()
    );
    fs::write(&path, contents).expect("write config");
    (dir, path)
}

/// Register a [`ScriptedAction`] under `name` and return a handle for
/// inspecting its calls.
pub fn register_scripted(
    engine: &mut Engine,
    name: &str,
    results: Vec<ScriptedResult>,
) -> Arc<ScriptedAction> {
    let action = Arc::new(ScriptedAction::new(results));
    let handle = Arc::clone(&action);
    engine
        .actions_mut()
        .register_fn(name, move |slots: Value, ctx: &ActionContext| {
            handle.run(slots, ctx)
        });
    action
}

/// An action that returns queued results in order and errors once they run out.
///
/// Slots pass through unchanged unless the queued response merges keys.
#[derive(Default)]
pub struct ScriptedAction {
    results: Mutex<VecDeque<ScriptedResult>>,
    calls: Mutex<Vec<String>>,
}

/// One scripted action response.
pub enum ScriptedResult {
    /// Return slots unchanged with this result code.
    Result(String),
    /// Merge these top-level keys into slots, then return this result code.
    Merge(Value, String),
    /// Fail with this message.
    Fail(String),
}

impl ScriptedAction {
    pub fn new(results: Vec<ScriptedResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// User responses seen by each call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Action for ScriptedAction {
    fn run(&self, mut slots: Value, ctx: &ActionContext) -> Result<ActionOutcome> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(ctx.user_response.clone());
        let next = self
            .results
            .lock()
            .expect("results lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted action exhausted at stage '{}'", ctx.stage_id))?;
        match next {
            ScriptedResult::Result(result) => Ok(ActionOutcome::with_result(slots, result)),
            ScriptedResult::Merge(patch, result) => {
                if let (Value::Object(target), Value::Object(patch)) = (&mut slots, patch) {
                    target.extend(patch);
                }
                Ok(ActionOutcome::with_result(slots, result))
            }
            ScriptedResult::Fail(message) => Err(anyhow!(message)),
        }
    }
}
