//! Engine configuration stored in `interview.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::loop_guard::LoopGuardConfig;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "interview.toml";

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values the
/// bundled flows are tuned for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory that flow file names in `flows` are resolved against.
    pub flows_dir: PathBuf,

    /// Flow used when a command does not name one.
    pub default_flow_id: String,

    /// Auto-advance step budget for new sessions.
    pub max_auto_advance_steps: u32,

    /// Sent when a stage is left without rendering its prompt.
    pub transition_message: String,

    /// Sent when the active stage type has no prompt to render.
    pub fallback_message: String,

    /// Sent at the terminal stage when the flow does not declare a prompt for it.
    pub completion_message: String,

    /// Flow id to flow file name.
    pub flows: BTreeMap<String, String>,

    pub loop_guard: LoopGuardConfig,

    pub clarify: ClarifyConfig,

    /// External command actions, by action name.
    pub actions: BTreeMap<String, CommandActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClarifyConfig {
    /// Answers shorter than this many characters are "too short".
    pub min_answer_chars: usize,
}

impl Default for ClarifyConfig {
    fn default() -> Self {
        Self {
            min_answer_chars: 5,
        }
    }
}

/// An action implemented by an external command.
///
/// The command reads `{"slots": ..., "user_response": ...}` as JSON on stdin
/// and prints either the updated slots or `{"slots": ..., "result": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandActionConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for CommandActionConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let flows = BTreeMap::from([(
            "process_discovery_demo_v1".to_string(),
            "process_discovery_demo_v1.json".to_string(),
        )]);

        Self {
            flows_dir: PathBuf::from("flows"),
            default_flow_id: "process_discovery_demo_v1".to_string(),
            max_auto_advance_steps: 50,
            transition_message: "Thanks — moving on.".to_string(),
            fallback_message: "Unexpected stage type. Please continue.".to_string(),
            completion_message: "Interview complete. Thank you!".to_string(),
            flows,
            loop_guard: LoopGuardConfig::default(),
            clarify: ClarifyConfig::default(),
            actions: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_auto_advance_steps == 0 {
            return Err(anyhow!("max_auto_advance_steps must be > 0"));
        }
        if self.default_flow_id.trim().is_empty() {
            return Err(anyhow!("default_flow_id must be non-empty"));
        }
        for (flow_id, file) in &self.flows {
            if file.trim().is_empty() {
                return Err(anyhow!("flows.{flow_id} must name a file"));
            }
        }
        self.loop_guard.validate()?;
        for (name, action) in &self.actions {
            if action.command.is_empty() || action.command[0].trim().is_empty() {
                return Err(anyhow!("actions.{name}.command must be a non-empty array"));
            }
            if action.timeout_secs == 0 {
                return Err(anyhow!("actions.{name}.timeout_secs must be > 0"));
            }
            if action.output_limit_bytes == 0 {
                return Err(anyhow!("actions.{name}.output_limit_bytes must be > 0"));
            }
        }
        Ok(())
    }

    /// Resolve relative paths in this config against `base`.
    pub fn rebase(mut self, base: &Path) -> Self {
        if self.flows_dir.is_relative() {
            self.flows_dir = base.join(&self.flows_dir);
        }
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
