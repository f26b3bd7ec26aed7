//! Named actions invoked by `action` stages.
//!
//! The [`Action`] trait decouples the turn pipeline from what an action does.
//! Built-in workflow actions live in [`workflow`]; actions backed by external
//! commands live in [`command`]. Tests register scripted actions.

pub mod command;
pub mod workflow;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::io::config::EngineConfig;

/// Result code reported by actions that do not choose one.
pub const SUCCESS: &str = "success";

/// What an action may know about the turn that invoked it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionContext {
    pub flow_id: String,
    pub stage_id: String,
    /// Latest user message, or empty when the turn has none.
    pub user_response: String,
}

/// Everything an action hands back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub slots: Value,
    /// Routing signal consulted by the next `branch` stage.
    pub result: String,
    /// Questions stages whose cursors restart at the first question.
    pub reset_cursors: Vec<String>,
}

impl ActionOutcome {
    /// Outcome carrying updated slots and the default result code.
    pub fn slots(slots: Value) -> Self {
        Self::with_result(slots, SUCCESS)
    }

    pub fn with_result(slots: Value, result: impl Into<String>) -> Self {
        Self {
            slots,
            result: result.into(),
            reset_cursors: Vec::new(),
        }
    }

    pub fn resetting_cursors<I, S>(mut self, stage_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reset_cursors.extend(stage_ids.into_iter().map(Into::into));
        self
    }
}

/// A unit of work that transforms slots.
///
/// Actions own the slots they are given, so a failed action leaves the
/// session's slots untouched.
pub trait Action: Send + Sync {
    fn run(&self, slots: Value, ctx: &ActionContext) -> Result<ActionOutcome>;
}

impl<F> Action for F
where
    F: Fn(Value, &ActionContext) -> Result<ActionOutcome> + Send + Sync,
{
    fn run(&self, slots: Value, ctx: &ActionContext) -> Result<ActionOutcome> {
        self(slots, ctx)
    }
}

/// Action names to implementations.
#[derive(Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Box<dyn Action>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in workflow action.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        workflow::register_builtins(&mut registry);
        registry
    }

    /// Built-ins plus the command actions configured in `config`.
    ///
    /// Configured actions replace built-ins of the same name.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut registry = Self::with_builtins();
        for (name, action) in &config.actions {
            registry.register(name, command::CommandAction::new(name, action.clone()));
        }
        registry
    }

    pub fn register(&mut self, name: &str, action: impl Action + 'static) {
        self.actions.insert(name.to_string(), Box::new(action));
    }

    /// Register a closure; its argument types are inferred from this signature.
    pub fn register_fn<F>(&mut self, name: &str, action: F)
    where
        F: Fn(Value, &ActionContext) -> Result<ActionOutcome> + Send + Sync + 'static,
    {
        self.register(name, action);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(|action| action.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Run action `name`. Unknown names are an error.
    pub fn run(&self, name: &str, slots: Value, ctx: &ActionContext) -> Result<ActionOutcome> {
        let action = self
            .get(name)
            .ok_or_else(|| anyhow!("unknown action '{name}'"))?;
        action.run(slots, ctx)
    }
}
