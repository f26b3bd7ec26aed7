//! Declarative flow definitions.
//!
//! A flow is a graph of typed stages plus an initial slot template. Flow files
//! are authored as JSON; unknown fields are ignored so older engines can read
//! newer files.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stage id that terminates every flow. It does not need to be declared.
pub const TERMINAL_STAGE: &str = "end";

/// Stage id used as the entry point when a flow does not name one.
pub const DEFAULT_ENTRY_STAGE: &str = "welcome";

/// Follow-up used when a clarify rule does not carry its own.
pub const DEFAULT_FOLLOW_UP: &str = "Can you provide more detail?";

/// Question used by confirm stages without an `ask`.
pub const DEFAULT_CONFIRM_ASK: &str = "Is this correct?";

fn terminal_stage() -> String {
    TERMINAL_STAGE.to_string()
}

fn default_follow_up() -> String {
    DEFAULT_FOLLOW_UP.to_string()
}

fn default_confirm_ask() -> String {
    DEFAULT_CONFIRM_ASK.to_string()
}

fn default_true() -> bool {
    true
}

/// Immutable stage graph loaded from a flow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub context: FlowContext,
}

/// Seed data for new sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    #[serde(default)]
    pub slots: Value,
}

impl FlowDefinition {
    /// Look up a stage by id.
    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == stage_id)
    }

    /// Entry stage: the declared `entry`, else `welcome` when present, else the first stage.
    pub fn entry_stage(&self) -> &str {
        if let Some(entry) = self.entry.as_deref() {
            return entry;
        }
        if self.stage(DEFAULT_ENTRY_STAGE).is_some() {
            return DEFAULT_ENTRY_STAGE;
        }
        self.stages
            .first()
            .map(|stage| stage.id.as_str())
            .unwrap_or(TERMINAL_STAGE)
    }
}

/// One node in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    /// Free-form prompt. Only rendered for the terminal stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub kind: StageKind,
}

/// Type-specific stage attributes, tagged by `type` in flow files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StageKind {
    Message {
        #[serde(default = "terminal_stage")]
        next: String,
    },
    Questions {
        #[serde(default)]
        questions: Vec<Question>,
        #[serde(default = "terminal_stage")]
        next: String,
    },
    Action {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_to: Option<String>,
        #[serde(default = "terminal_stage")]
        next: String,
    },
    Confirm {
        #[serde(default = "default_confirm_ask")]
        ask: String,
        #[serde(default)]
        summary_template: String,
        #[serde(default = "terminal_stage")]
        on_yes: String,
        #[serde(default = "terminal_stage")]
        on_no: String,
    },
    Gate {
        #[serde(default)]
        criteria: Vec<Criterion>,
        #[serde(default = "terminal_stage")]
        on_pass: String,
        #[serde(default = "terminal_stage")]
        on_fail: String,
    },
    Branch {
        #[serde(default)]
        branches: Vec<Branch>,
    },
    Loop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_condition: Option<StopCondition>,
        #[serde(default = "terminal_stage")]
        on_stop: String,
        #[serde(default = "terminal_stage")]
        next: String,
    },
    Output {
        #[serde(default = "terminal_stage")]
        next: String,
    },
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Message { .. } => "message",
            StageKind::Questions { .. } => "questions",
            StageKind::Action { .. } => "action",
            StageKind::Confirm { .. } => "confirm",
            StageKind::Gate { .. } => "gate",
            StageKind::Branch { .. } => "branch",
            StageKind::Loop { .. } => "loop",
            StageKind::Output { .. } => "output",
        }
    }

    /// True for stage types that wait for user input.
    pub fn is_interactive(&self) -> bool {
        matches!(self, StageKind::Questions { .. } | StageKind::Confirm { .. })
    }

    /// Every stage id this stage can transition to, in declaration order.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            StageKind::Message { next }
            | StageKind::Questions { next, .. }
            | StageKind::Action { next, .. }
            | StageKind::Output { next } => vec![next.as_str()],
            StageKind::Confirm { on_yes, on_no, .. } => vec![on_yes.as_str(), on_no.as_str()],
            StageKind::Gate {
                on_pass, on_fail, ..
            } => vec![on_pass.as_str(), on_fail.as_str()],
            StageKind::Branch { branches } => {
                branches.iter().map(|branch| branch.next.as_str()).collect()
            }
            StageKind::Loop { on_stop, next, .. } => vec![on_stop.as_str(), next.as_str()],
        }
    }
}

/// One question inside a `questions` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub ask: String,
    #[serde(default)]
    pub save_to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarify_if: Vec<ClarifyRule>,
}

/// Follow-up asked once when an answer meets `condition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyRule {
    pub condition: ClarifyCondition,
    #[serde(default = "default_follow_up")]
    pub follow_up: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarifyCondition {
    EmptyOrTooShort,
    Vague,
    UnclearYesNo,
    /// Conditions this engine does not know never trigger.
    #[serde(other)]
    Unknown,
}

/// Slot completeness check evaluated by `gate` stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub slot: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub when: BranchCondition,
    #[serde(default = "terminal_stage")]
    pub next: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_result_equals: Option<ExpectedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedValue {
    pub value: Value,
}

impl BranchCondition {
    /// True when the condition names `result` as the expected action result.
    pub fn matches(&self, result: Option<&str>) -> bool {
        match (&self.action_result_equals, result) {
            (Some(expected), Some(result)) => expected.value.as_str() == Some(result),
            _ => false,
        }
    }
}

/// Loop exit signal: the loop stops once `signal_slot` holds no value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_slot: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_stage_type_and_ignores_unknown_fields() {
        let raw = json!({
            "flow_id": "demo",
            "owner": "ops team",
            "stages": [
                {"id": "welcome", "type": "message", "next": "q", "color": "blue"},
                {"id": "q", "type": "questions", "next": "c", "questions": [
                    {"id": "q1", "ask": "Name?", "save_to": "a.name",
                     "clarify_if": [{"condition": "empty_or_too_short"}]}
                ]},
                {"id": "c", "type": "confirm", "on_yes": "g", "on_no": "q"},
                {"id": "g", "type": "gate", "criteria": [{"slot": "a.name"}], "on_pass": "act", "on_fail": "q"},
                {"id": "act", "type": "action", "action": "noop", "next": "b"},
                {"id": "b", "type": "branch", "branches": [
                    {"when": {"action_result_equals": {"value": "success"}}, "next": "l"}
                ]},
                {"id": "l", "type": "loop", "stop_condition": {"signal_slot": "a.idx"}, "on_stop": "o", "next": "q"},
                {"id": "o", "type": "output"}
            ],
            "context": {"slots": {"a": {}}}
        });

        let flow: FlowDefinition = serde_json::from_value(raw).expect("parse flow");
        assert_eq!(flow.stages.len(), 8);
        assert_eq!(flow.entry_stage(), "welcome");

        let StageKind::Questions { questions, .. } = &flow.stage("q").expect("q").kind else {
            panic!("expected questions stage");
        };
        assert_eq!(questions[0].clarify_if[0].follow_up, DEFAULT_FOLLOW_UP);
        assert!(flow.stage("g").is_some_and(|stage| matches!(
            &stage.kind,
            StageKind::Gate { criteria, .. } if criteria[0].required
        )));
        assert_eq!(
            flow.stage("o").expect("o").kind.successors(),
            vec![TERMINAL_STAGE]
        );
    }

    #[test]
    fn unknown_clarify_condition_parses_as_unknown() {
        let rule: ClarifyRule =
            serde_json::from_value(json!({"condition": "too_polite", "follow_up": "?"}))
                .expect("parse rule");
        assert_eq!(rule.condition, ClarifyCondition::Unknown);
    }

    #[test]
    fn entry_stage_falls_back_to_first_stage() {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "stages": [{"id": "start", "type": "message", "next": "end"}]
        }))
        .expect("parse flow");
        assert_eq!(flow.entry_stage(), "start");
    }

    #[test]
    fn branch_condition_matches_string_results_only() {
        let cond = BranchCondition {
            action_result_equals: Some(ExpectedValue {
                value: json!("done"),
            }),
        };
        assert!(cond.matches(Some("done")));
        assert!(!cond.matches(Some("continue")));
        assert!(!cond.matches(None));
        assert!(!BranchCondition::default().matches(Some("done")));
    }
}
