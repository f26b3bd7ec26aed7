//! Actions implemented by external commands.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::actions::{Action, ActionContext, ActionOutcome};
use crate::io::config::CommandActionConfig;
use crate::io::process::{ProcessLimits, run_with_input};

const ENVELOPE_KEYS: &[&str] = &["slots", "result", "reset_cursors"];

/// Runs a configured command, feeding it slots as JSON on stdin.
///
/// The command prints either the updated slots object, or an envelope
/// `{"slots": ..., "result": "...", "reset_cursors": [...]}`.
#[derive(Debug, Clone)]
pub struct CommandAction {
    name: String,
    config: CommandActionConfig,
}

impl CommandAction {
    pub fn new(name: &str, config: CommandActionConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }

    fn command(&self) -> Result<Command> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("action '{}' has an empty command", self.name))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }
}

impl Action for CommandAction {
    #[instrument(skip_all, fields(action = %self.name, stage_id = %ctx.stage_id))]
    fn run(&self, slots: Value, ctx: &ActionContext) -> Result<ActionOutcome> {
        let input = serde_json::to_vec(&json!({
            "flow_id": ctx.flow_id,
            "stage_id": ctx.stage_id,
            "slots": slots,
            "user_response": ctx.user_response,
        }))
        .context("serialize action input")?;

        let limits = ProcessLimits {
            timeout: Duration::from_secs(self.config.timeout_secs),
            output_limit_bytes: self.config.output_limit_bytes,
        };
        let output = run_with_input(self.command()?, input, limits)
            .with_context(|| format!("run action '{}'", self.name))?;

        if output.timed_out {
            bail!(
                "action '{}' timed out after {}s",
                self.name,
                self.config.timeout_secs
            );
        }
        if !output.status.success() {
            bail!(
                "action '{}' failed with {}: {}",
                self.name,
                output.status,
                output.stderr.lossy()
            );
        }
        if output.stdout.is_truncated() {
            warn!(dropped = output.stdout.dropped, "action output exceeded limit");
            bail!(
                "output of action '{}' exceeded {} bytes",
                self.name,
                self.config.output_limit_bytes
            );
        }

        let value: Value = serde_json::from_slice(&output.stdout.bytes)
            .with_context(|| format!("parse output of action '{}'", self.name))?;
        let outcome = parse_outcome(value)
            .with_context(|| format!("interpret output of action '{}'", self.name))?;
        debug!(result = %outcome.result, "command action finished");
        Ok(outcome)
    }
}

/// Read command output as an envelope when it looks like one, else as slots.
pub fn parse_outcome(value: Value) -> Result<ActionOutcome> {
    let Value::Object(mut map) = value else {
        bail!("expected a JSON object");
    };
    let is_envelope =
        map.contains_key("slots") && map.keys().all(|key| ENVELOPE_KEYS.contains(&key.as_str()));
    if !is_envelope {
        return Ok(ActionOutcome::slots(Value::Object(map)));
    }

    let slots = map.remove("slots").unwrap_or(Value::Null);
    if !slots.is_object() {
        bail!("envelope 'slots' must be an object");
    }
    let mut outcome = match map.remove("result") {
        None | Some(Value::Null) => ActionOutcome::slots(slots),
        Some(Value::String(result)) => ActionOutcome::with_result(slots, result),
        Some(other) => bail!("envelope 'result' must be a string, got {other}"),
    };
    if let Some(resets) = map.remove("reset_cursors") {
        let resets: Vec<String> =
            serde_json::from_value(resets).context("envelope 'reset_cursors'")?;
        outcome = outcome.resetting_cursors(resets);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::SUCCESS;

    #[test]
    fn bare_object_is_slots() {
        let outcome = parse_outcome(json!({"engagement": {"name": "AP"}})).expect("parse");
        assert_eq!(outcome.result, SUCCESS);
        assert_eq!(outcome.slots, json!({"engagement": {"name": "AP"}}));
    }

    #[test]
    fn envelope_carries_result_and_resets() {
        let outcome = parse_outcome(json!({
            "slots": {"a": 1},
            "result": "done",
            "reset_cursors": ["capture"]
        }))
        .expect("parse");
        assert_eq!(outcome.slots, json!({"a": 1}));
        assert_eq!(outcome.result, "done");
        assert_eq!(outcome.reset_cursors, vec!["capture".to_string()]);
    }

    #[test]
    fn slots_key_alongside_other_keys_is_plain_slots() {
        let value = json!({"slots": {"a": 1}, "engagement": {}});
        let outcome = parse_outcome(value.clone()).expect("parse");
        assert_eq!(outcome.slots, value);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(parse_outcome(json!([1, 2])).is_err());
        assert!(parse_outcome(json!({"slots": "nope"})).is_err());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        fn sh_action(script: &str) -> CommandAction {
            CommandAction::new(
                "scripted",
                CommandActionConfig {
                    command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                    timeout_secs: 10,
                    ..CommandActionConfig::default()
                },
            )
        }

        #[test]
        fn runs_command_with_slots_on_stdin() {
            let action = sh_action(
                r#"cat >/dev/null; printf '{"slots":{"stamped":true},"result":"ok"}'"#,
            );
            let outcome = action
                .run(json!({"a": 1}), &ActionContext::default())
                .expect("run");
            assert_eq!(outcome.slots, json!({"stamped": true}));
            assert_eq!(outcome.result, "ok");
        }

        #[test]
        fn echoed_input_round_trips_as_plain_slots() {
            // The input object has more keys than an envelope, so it is read as slots.
            let action = sh_action("cat");
            let ctx = ActionContext {
                flow_id: "intake".to_string(),
                stage_id: "enrich".to_string(),
                user_response: "yes".to_string(),
            };
            let outcome = action.run(json!({"a": 1}), &ctx).expect("run");
            assert_eq!(outcome.slots["user_response"], "yes");
            assert_eq!(outcome.slots["slots"], json!({"a": 1}));
        }

        #[test]
        fn nonzero_exit_is_an_error() {
            let action = sh_action("echo broken >&2; exit 3");
            let err = action
                .run(json!({}), &ActionContext::default())
                .expect_err("failure");
            assert!(format!("{err:#}").contains("broken"));
        }

        #[test]
        fn oversized_output_is_an_error() {
            let mut action = sh_action("printf '{\"slots\":{\"a\":\"0123456789\"}}'");
            action.config.output_limit_bytes = 8;
            let err = action
                .run(json!({}), &ActionContext::default())
                .expect_err("truncated");
            assert!(format!("{err:#}").contains("exceeded 8 bytes"));
        }

        #[test]
        fn non_json_output_is_an_error() {
            let action = sh_action("echo hello");
            assert!(action.run(json!({}), &ActionContext::default()).is_err());
        }
    }
}
