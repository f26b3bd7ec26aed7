//! Per-conversation session state.
//!
//! Everything a turn needs lives in [`SessionState`], which serializes to JSON
//! so a session can be stored between turns and resumed in another process.

use crate::flow::{ClarifyRule, TERMINAL_STAGE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The input the session is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pending {
    Question(PendingQuestion),
    Confirm(PendingConfirm),
}

impl Pending {
    pub fn stage_id(&self) -> &str {
        match self {
            Pending::Question(pending) => &pending.stage_id,
            Pending::Confirm(pending) => &pending.confirm_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub stage_id: String,
    pub question_index: usize,
    pub question_id: String,
    pub save_to: String,
    /// The question as rendered for the user.
    #[serde(default)]
    pub ask: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarify_if: Vec<ClarifyRule>,
    /// Set while waiting for the reply to a clarification follow-up.
    #[serde(default)]
    pub is_clarifying: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirm {
    /// Id of the confirm stage awaiting the answer.
    pub confirm_id: String,
    /// The rendered ask, without the summary.
    #[serde(default)]
    pub ask: String,
    #[serde(default)]
    pub summary_template: String,
    #[serde(default)]
    pub on_yes: String,
    #[serde(default)]
    pub on_no: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClarifyRequested,
    AnswerIngested,
    ConfirmIngested,
    AnswerIgnored,
    PathUnresolved,
    StageAdvanced,
    ActionExecuted,
    QuestionCursorsReset,
    GateRouted,
    BranchRouted,
    LoopExit,
    AutoAdvanceStop,
    AutoAdvanceSummary,
    LoopDetectedForceAdvance,
    PromptRendered,
    TurnError,
}

/// One append-only trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Complete state of one interview session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub flow_id: String,
    pub active_stage_id: String,
    #[serde(default)]
    pub slots: Value,
    #[serde(default)]
    pub pending: Option<Pending>,
    /// Next question index per questions stage. Entries are removed once a
    /// stage's questions are exhausted.
    #[serde(default)]
    pub question_cursor: BTreeMap<String, usize>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub auto_advance_count: u32,
    pub max_auto_advance_steps: u32,
    /// Messages before this index are ignored by the repeated-prompt guard.
    #[serde(default)]
    pub loop_guard_floor: usize,
}

impl SessionState {
    /// Fresh session positioned at `entry_stage` with empty slots.
    ///
    /// Slots are seeded from the flow's template on the first turn.
    pub fn new(
        flow_id: impl Into<String>,
        entry_stage: impl Into<String>,
        max_auto_advance_steps: u32,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            active_stage_id: entry_stage.into(),
            slots: Value::Object(Map::new()),
            pending: None,
            question_cursor: BTreeMap::new(),
            messages: Vec::new(),
            events: Vec::new(),
            error: None,
            retry_count: 0,
            auto_advance_count: 0,
            max_auto_advance_steps,
            loop_guard_floor: 0,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Latest message, when it came from the user.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.active_stage_id == TERMINAL_STAGE
    }

    /// True when slots have not been seeded yet.
    pub fn slots_empty(&self) -> bool {
        match &self.slots {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Clear a recorded error so the session can take turns again.
    pub fn clear_error(&mut self) {
        self.error = None;
    }
}
