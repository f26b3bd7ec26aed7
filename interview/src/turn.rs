//! Orchestration for a single interview turn.
//!
//! A turn takes the session state and an optional user message and runs:
//! load → ingest → auto-advance → loop guard → render. Each step either
//! completes or leaves the state as it found it; the first failing step
//! records `error` and ends the turn.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::actions::{ActionContext, ActionRegistry};
use crate::core::advancer::{self, AdvanceInput};
use crate::core::clarify::{combine_answers, first_triggered};
use crate::core::intent::DEFAULT_TABLES;
use crate::core::loop_guard::repeated_prompt;
use crate::core::path::{self, WriteOutcome};
use crate::core::template;
use crate::flow::{FlowDefinition, Stage, StageKind, TERMINAL_STAGE};
use crate::io::config::EngineConfig;
use crate::io::flow_store::{FlowError, FlowStore};
use crate::session::{
    Event, EventKind, Message, Pending, PendingConfirm, PendingQuestion, Role, SessionState,
};

/// Slot holding the result code of the most recent action.
pub const LAST_ACTION_RESULT: &str = "_last_action_result";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("auto-advance exceeded max steps ({limit}) at stage '{stage_id}'")]
    BudgetExceeded { limit: u32, stage_id: String },
}

/// Whether the caller should keep the conversation going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    End,
}

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: SessionState,
    pub continuation: Continuation,
    /// Index of the first message appended by this turn.
    pub first_new_message: usize,
    /// Index of the first event appended by this turn.
    pub first_new_event: usize,
}

impl TurnOutcome {
    /// Messages appended by this turn, including the user's.
    pub fn new_messages(&self) -> &[Message] {
        self.state
            .messages
            .get(self.first_new_message..)
            .unwrap_or_default()
    }

    pub fn new_events(&self) -> &[Event] {
        self.state.events.get(self.first_new_event..).unwrap_or_default()
    }

    /// The last assistant message this turn produced, if any.
    pub fn reply(&self) -> Option<&str> {
        self.new_messages()
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

enum Ingested {
    /// Nothing to ingest, or the answer was consumed.
    Continue,
    /// A follow-up question was asked; the turn stops here.
    Clarifying,
}

/// Runs turns against a flow store and an action registry.
///
/// The engine holds no per-session data, so one engine can serve any number
/// of sessions from any number of threads.
#[derive(Debug)]
pub struct Engine {
    store: FlowStore,
    actions: ActionRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: FlowStore, actions: ActionRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            actions,
            config,
        }
    }

    /// Engine over the configured flows directory, built-in actions, and
    /// configured command actions.
    pub fn from_config(config: EngineConfig) -> Self {
        Self::new(
            FlowStore::from_config(&config),
            ActionRegistry::from_config(&config),
            config,
        )
    }

    pub fn store(&self) -> &FlowStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register or replace actions after construction.
    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    /// Fresh session for `flow_id`, positioned at its entry stage with seeded slots.
    pub fn start_session(&self, flow_id: &str) -> Result<SessionState, FlowError> {
        let flow = self.store.load(flow_id)?;
        let mut state = SessionState::new(
            flow_id,
            flow.entry_stage(),
            self.config.max_auto_advance_steps,
        );
        state.slots = self.store.initial_slots(flow_id)?;
        Ok(state)
    }

    /// Run one turn. Never fails: problems are recorded on the returned state.
    #[instrument(skip_all, fields(flow_id = %state.flow_id, stage_id = %state.active_stage_id))]
    pub fn run_turn(&self, mut state: SessionState, user_message: Option<&str>) -> TurnOutcome {
        let first_new_message = state.messages.len();
        let first_new_event = state.events.len();

        if state.error.is_some() {
            debug!("session has an unresolved error; skipping turn");
            return TurnOutcome {
                state,
                continuation: Continuation::End,
                first_new_message,
                first_new_event,
            };
        }

        if let Some(text) = user_message {
            state.push_user(text);
        }
        if let Err(err) = self.step(&mut state) {
            record_error(&mut state, &err);
        }

        let continuation = if state.error.is_some() || state.is_complete() {
            Continuation::End
        } else {
            Continuation::Continue
        };
        debug!(stage = %state.active_stage_id, ?continuation, "turn finished");
        TurnOutcome {
            state,
            continuation,
            first_new_message,
            first_new_event,
        }
    }

    fn step(&self, state: &mut SessionState) -> Result<()> {
        let flow = self.store.load(&state.flow_id).context("load flow")?;
        if state.slots_empty() {
            state.slots = self
                .store
                .initial_slots(&state.flow_id)
                .context("load flow")?;
        }

        if let Ingested::Clarifying = self.ingest(&flow, state).context("ingest answer")? {
            return Ok(());
        }
        self.auto_advance(&flow, state)?;
        if self.guard_loop(&flow, state).context("loop guard")? {
            return Ok(());
        }
        self.render(&flow, state).context("render prompt")
    }

    fn ingest(&self, flow: &FlowDefinition, state: &mut SessionState) -> Result<Ingested> {
        let Some(pending) = state.pending.clone() else {
            return Ok(Ingested::Continue);
        };
        let Some(answer) = state.latest_user_message().map(str::to_string) else {
            return Ok(Ingested::Continue);
        };
        let stage = lookup(flow, &state.flow_id, &state.active_stage_id)?;

        if pending.stage_id() != stage.id {
            state.pending = None;
            state.record(
                Event::new(EventKind::AnswerIgnored)
                    .with("stage_id", stage.id.as_str())
                    .with("reason", "pending_stage_mismatch"),
            );
            return Ok(Ingested::Continue);
        }

        match pending {
            Pending::Question(question) => self.ingest_answer(stage, state, question, &answer),
            Pending::Confirm(_) if matches!(stage.kind, StageKind::Confirm { .. }) => {
                let input = AdvanceInput {
                    user_response: Some(&answer),
                    last_action_result: None,
                };
                let next = advancer::next_stage(stage, &state.slots, input, &DEFAULT_TABLES);
                debug!(stage_id = %stage.id, next, "confirm answered");
                state.pending = None;
                state.record(
                    Event::new(EventKind::ConfirmIngested)
                        .with("stage_id", stage.id.as_str())
                        .with("user_text", answer.as_str())
                        .with("next_stage_id", next),
                );
                state.active_stage_id = next.to_string();
                Ok(Ingested::Continue)
            }
            Pending::Confirm(_) => {
                state.pending = None;
                state.record(
                    Event::new(EventKind::AnswerIgnored)
                        .with("stage_id", stage.id.as_str())
                        .with("reason", "confirm_pending_on_non_confirm_stage"),
                );
                Ok(Ingested::Continue)
            }
        }
    }

    fn ingest_answer(
        &self,
        stage: &Stage,
        state: &mut SessionState,
        question: PendingQuestion,
        answer: &str,
    ) -> Result<Ingested> {
        let value = if question.is_clarifying {
            combine_answers(
                question.original_answer.as_deref().unwrap_or_default(),
                answer,
            )
        } else {
            let min_chars = self.config.clarify.min_answer_chars;
            if let Some(rule) =
                first_triggered(&question.clarify_if, answer, min_chars, &DEFAULT_TABLES)
            {
                debug!(question_id = %question.question_id, condition = ?rule.condition, "asking follow-up");
                state.push_assistant(rule.follow_up.as_str());
                state.record(
                    Event::new(EventKind::ClarifyRequested)
                        .with("stage_id", stage.id.as_str())
                        .with("save_to", question.save_to.as_str())
                        .with("condition", serde_json::to_value(rule.condition)?)
                        .with("follow_up", rule.follow_up.as_str()),
                );
                state.pending = Some(Pending::Question(PendingQuestion {
                    is_clarifying: true,
                    original_answer: Some(answer.to_string()),
                    ..question
                }));
                return Ok(Ingested::Clarifying);
            }
            answer.to_string()
        };

        if !question.save_to.is_empty() {
            let outcome = path::set(&mut state.slots, &question.save_to, Value::String(value));
            if let WriteOutcome::Skipped(reason) = outcome {
                warn!(save_to = %question.save_to, reason = reason.as_str(), "answer not written");
                state.record(
                    Event::new(EventKind::PathUnresolved)
                        .with("stage_id", stage.id.as_str())
                        .with("save_to", question.save_to.as_str())
                        .with("reason", reason.as_str()),
                );
            }
        }
        state.pending = None;

        let event = Event::new(EventKind::AnswerIngested)
            .with("stage_id", stage.id.as_str())
            .with("stage_type", stage.kind.name())
            .with("save_to", question.save_to.as_str());
        let event = match &stage.kind {
            StageKind::Questions { questions, next } => {
                let next_index = question.question_index + 1;
                if next_index < questions.len() {
                    state.question_cursor.insert(stage.id.clone(), next_index);
                    event
                        .with("advanced_within_stage", true)
                        .with("next_question_index", next_index)
                } else {
                    state.question_cursor.remove(&stage.id);
                    state.active_stage_id = next.clone();
                    event
                        .with("advanced_within_stage", false)
                        .with("next_stage_id", next.as_str())
                }
            }
            _ => event.with("advanced_within_stage", false),
        };
        state.record(event);
        Ok(Ingested::Continue)
    }

    /// Process stages that need no user input until one does.
    ///
    /// Works on copies of the slots and cursors; nothing is committed to
    /// `state` unless the walk reaches an interactive or terminal stage
    /// within the step budget.
    fn auto_advance(&self, flow: &FlowDefinition, state: &mut SessionState) -> Result<()> {
        let limit = state.max_auto_advance_steps;
        let user_response = state.latest_user_message().unwrap_or_default().to_string();
        let mut stage_id = state.active_stage_id.clone();
        let mut slots = state.slots.clone();
        let mut cursor: BTreeMap<String, usize> = state.question_cursor.clone();
        let mut events = Vec::new();
        let mut steps: u32 = 0;

        loop {
            if stage_id == TERMINAL_STAGE {
                events.push(
                    Event::new(EventKind::AutoAdvanceStop)
                        .with("stage_id", TERMINAL_STAGE)
                        .with("stage_type", TERMINAL_STAGE),
                );
                break;
            }
            let stage = lookup(flow, &state.flow_id, &stage_id).context("auto-advance")?;
            if stage.kind.is_interactive() {
                events.push(
                    Event::new(EventKind::AutoAdvanceStop)
                        .with("stage_id", stage.id.as_str())
                        .with("stage_type", stage.kind.name()),
                );
                break;
            }
            if steps >= limit {
                warn!(limit, stage_id = %stage.id, "auto-advance budget exhausted");
                return Err(TurnError::BudgetExceeded {
                    limit,
                    stage_id: stage.id.clone(),
                }
                .into());
            }

            let next = match &stage.kind {
                StageKind::Action {
                    action,
                    save_to,
                    next,
                } => {
                    let ctx = ActionContext {
                        flow_id: state.flow_id.clone(),
                        stage_id: stage.id.clone(),
                        user_response: user_response.clone(),
                    };
                    let outcome = self
                        .actions
                        .run(action, slots, &ctx)
                        .with_context(|| format!("action '{action}' at stage '{}'", stage.id))?;
                    let Value::Object(mut map) = outcome.slots else {
                        bail!("action '{action}' returned slots that are not an object");
                    };
                    map.insert(
                        LAST_ACTION_RESULT.to_string(),
                        Value::String(outcome.result.clone()),
                    );
                    slots = Value::Object(map);
                    info!(action = %action, result = %outcome.result, "action executed");
                    events.push(
                        Event::new(EventKind::ActionExecuted)
                            .with("stage_id", stage.id.as_str())
                            .with("action", action.as_str())
                            .with("action_result", outcome.result.as_str())
                            .with("save_to", save_to.clone()),
                    );
                    if !outcome.reset_cursors.is_empty() {
                        for reset in &outcome.reset_cursors {
                            cursor.remove(reset);
                        }
                        events.push(
                            Event::new(EventKind::QuestionCursorsReset)
                                .with("stage_id", stage.id.as_str())
                                .with("reset_stages", outcome.reset_cursors.clone()),
                        );
                    }
                    events.push(advanced(stage, next));
                    next.clone()
                }
                StageKind::Gate { criteria, .. } => {
                    let next =
                        advancer::next_stage(stage, &slots, AdvanceInput::default(), &DEFAULT_TABLES);
                    events.push(
                        Event::new(EventKind::GateRouted)
                            .with("stage_id", stage.id.as_str())
                            .with("criteria", serde_json::to_value(criteria)?)
                            .with("next_stage_id", next),
                    );
                    next.to_string()
                }
                StageKind::Branch { .. } => {
                    let last_result = path::get_str(&slots, LAST_ACTION_RESULT);
                    let input = AdvanceInput {
                        user_response: None,
                        last_action_result: last_result,
                    };
                    let next = advancer::next_stage(stage, &slots, input, &DEFAULT_TABLES);
                    events.push(
                        Event::new(EventKind::BranchRouted)
                            .with("stage_id", stage.id.as_str())
                            .with("last_action_result", last_result)
                            .with("next_stage_id", next),
                    );
                    next.to_string()
                }
                StageKind::Loop {
                    stop_condition,
                    on_stop,
                    next,
                } => {
                    if advancer::loop_should_stop(stop_condition.as_ref(), &slots) {
                        events.push(
                            Event::new(EventKind::LoopExit)
                                .with("stage_id", stage.id.as_str())
                                .with(
                                    "signal_slot",
                                    stop_condition
                                        .as_ref()
                                        .and_then(|cond| cond.signal_slot.clone()),
                                ),
                        );
                        events.push(advanced(stage, on_stop).with("note", "loop_exited"));
                        on_stop.clone()
                    } else {
                        events.push(advanced(stage, next).with("note", "loop_continue"));
                        next.clone()
                    }
                }
                StageKind::Message { next } | StageKind::Output { next } => {
                    events.push(advanced(stage, next));
                    next.clone()
                }
                // Stopped above, before the budget check.
                StageKind::Questions { .. } | StageKind::Confirm { .. } => break,
            };
            steps += 1;
            stage_id = next;
        }

        events.push(
            Event::new(EventKind::AutoAdvanceSummary)
                .with("steps", steps)
                .with("max_steps", limit),
        );
        debug!(steps, stage = %stage_id, "auto-advance finished");

        state.active_stage_id = stage_id;
        state.slots = slots;
        state.question_cursor = cursor;
        state.auto_advance_count += steps;
        state.events.extend(events);
        Ok(())
    }

    /// Force the session forward when the same prompt keeps repeating.
    ///
    /// Returns true when the guard tripped; the turn then ends with the
    /// transition message instead of a rendered prompt.
    fn guard_loop(&self, flow: &FlowDefinition, state: &mut SessionState) -> Result<bool> {
        if state.is_complete() {
            return Ok(false);
        }
        let Some(repeated) =
            repeated_prompt(&state.messages, state.loop_guard_floor, &self.config.loop_guard)
                .map(str::to_string)
        else {
            return Ok(false);
        };

        let stage = lookup(flow, &state.flow_id, &state.active_stage_id)?;
        let next = forced_successor(stage).to_string();
        warn!(stage_id = %stage.id, next = %next, "repeated prompt detected, forcing advance");
        if matches!(stage.kind, StageKind::Questions { .. }) {
            state.question_cursor.remove(&stage.id);
        }
        state.pending = None;
        state.record(
            Event::new(EventKind::LoopDetectedForceAdvance)
                .with("stage_id", stage.id.as_str())
                .with("next_stage_id", next.as_str())
                .with("repeated_message", repeated),
        );
        state.active_stage_id = next;
        state.push_assistant(self.config.transition_message.as_str());
        state.loop_guard_floor = state.messages.len();
        Ok(true)
    }

    fn render(&self, flow: &FlowDefinition, state: &mut SessionState) -> Result<()> {
        if state.is_complete() {
            let text = match flow.stage(TERMINAL_STAGE).and_then(|stage| stage.prompt.as_deref())
            {
                Some(prompt) => template::render(prompt, &state.slots),
                None => self.config.completion_message.clone(),
            };
            state.pending = None;
            state.push_assistant(text);
            state.record(
                Event::new(EventKind::PromptRendered)
                    .with("stage_id", TERMINAL_STAGE)
                    .with("pending_type", Value::Null),
            );
            info!("interview complete");
            return Ok(());
        }

        let stage = lookup(flow, &state.flow_id, &state.active_stage_id)?;
        match &stage.kind {
            StageKind::Questions { questions, next } => {
                let index = state
                    .question_cursor
                    .get(&stage.id)
                    .copied()
                    .unwrap_or_default();
                let Some(question) = questions.get(index) else {
                    // Cursor past the end: move on rather than ask nothing.
                    state.question_cursor.remove(&stage.id);
                    state.active_stage_id = next.clone();
                    state.pending = None;
                    state.push_assistant(self.config.transition_message.as_str());
                    state.record(
                        Event::new(EventKind::PromptRendered)
                            .with("stage_id", stage.id.as_str())
                            .with("pending_type", Value::Null)
                            .with("note", "questions_exhausted"),
                    );
                    return Ok(());
                };

                let text = template::render(&question.ask, &state.slots);
                state.pending = Some(Pending::Question(PendingQuestion {
                    stage_id: stage.id.clone(),
                    question_index: index,
                    question_id: question.id.clone(),
                    save_to: question.save_to.clone(),
                    ask: text.clone(),
                    clarify_if: question.clarify_if.clone(),
                    is_clarifying: false,
                    original_answer: None,
                }));
                state.push_assistant(text);
                state.record(
                    Event::new(EventKind::PromptRendered)
                        .with("stage_id", stage.id.as_str())
                        .with("pending_type", "question")
                        .with("question_id", question.id.as_str())
                        .with("save_to", question.save_to.as_str())
                        .with("question_index", index),
                );
            }
            StageKind::Confirm {
                ask,
                summary_template,
                on_yes,
                on_no,
            } => {
                let summary = template::render(summary_template, &state.slots);
                let ask = template::render(ask, &state.slots);
                let text = if summary.trim().is_empty() {
                    ask.clone()
                } else {
                    format!("{summary}\n\n{ask}")
                };
                state.pending = Some(Pending::Confirm(PendingConfirm {
                    confirm_id: stage.id.clone(),
                    ask,
                    summary_template: summary_template.clone(),
                    on_yes: on_yes.clone(),
                    on_no: on_no.clone(),
                }));
                state.push_assistant(text);
                state.record(
                    Event::new(EventKind::PromptRendered)
                        .with("stage_id", stage.id.as_str())
                        .with("pending_type", "confirm")
                        .with("on_yes", on_yes.as_str())
                        .with("on_no", on_no.as_str()),
                );
            }
            _ => {
                warn!(stage_id = %stage.id, stage_type = stage.kind.name(), "no prompt for stage");
                state.pending = None;
                state.push_assistant(self.config.fallback_message.as_str());
                state.record(
                    Event::new(EventKind::PromptRendered)
                        .with("stage_id", stage.id.as_str())
                        .with("pending_type", Value::Null)
                        .with("note", "unexpected"),
                );
            }
        }
        Ok(())
    }
}

fn lookup<'f>(
    flow: &'f FlowDefinition,
    flow_id: &str,
    stage_id: &str,
) -> Result<&'f Stage, FlowError> {
    flow.stage(stage_id).ok_or_else(|| FlowError::StageNotFound {
        flow_id: flow_id.to_string(),
        stage_id: stage_id.to_string(),
    })
}

/// Where a stuck stage goes when the loop guard trips.
fn forced_successor(stage: &Stage) -> &str {
    match &stage.kind {
        StageKind::Message { next }
        | StageKind::Questions { next, .. }
        | StageKind::Action { next, .. }
        | StageKind::Output { next }
        | StageKind::Loop { next, .. } => next,
        StageKind::Confirm { on_yes, .. } => on_yes,
        StageKind::Gate { on_pass, .. } => on_pass,
        StageKind::Branch { branches } => branches
            .first()
            .map(|branch| branch.next.as_str())
            .unwrap_or(TERMINAL_STAGE),
    }
}

fn advanced(stage: &Stage, next: &str) -> Event {
    Event::new(EventKind::StageAdvanced)
        .with("stage_id", stage.id.as_str())
        .with("stage_type", stage.kind.name())
        .with("next_stage_id", next)
}

fn record_error(state: &mut SessionState, err: &anyhow::Error) {
    let message = format!("{err:#}");
    warn!(error = %message, "turn failed");
    state.error = Some(message.clone());
    state.retry_count += 1;
    state.record(Event::new(EventKind::TurnError).with("error", message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionOutcome;
    use crate::test_support::{
        confirm_stage, engine_with_flow, flow_of, message_stage, question, questions_stage,
    };
    use serde_json::json;

    fn confirm_flow() -> FlowDefinition {
        flow_of(
            vec![
                questions_stage(
                    "welcome",
                    vec![question("name", "Process name?", "engagement.name")],
                    "confirm_name",
                ),
                confirm_stage(
                    "confirm_name",
                    "You said: {{engagement.name}}",
                    "end",
                    "welcome",
                ),
            ],
            json!({"engagement": {"name": null}}),
        )
    }

    #[test]
    fn first_turn_renders_entry_question() {
        let engine = engine_with_flow("intake", confirm_flow());
        let state = engine.start_session("intake").expect("session");
        let outcome = engine.run_turn(state, None);

        assert_eq!(outcome.continuation, Continuation::Continue);
        assert_eq!(outcome.reply(), Some("Process name?"));
        assert!(matches!(
            outcome.state.pending,
            Some(Pending::Question(ref q)) if q.question_id == "name" && q.ask == "Process name?"
        ));
    }

    #[test]
    fn confirm_routes_on_yes_no_and_reprompts_when_unclear() {
        let engine = engine_with_flow("intake", confirm_flow());
        let state = engine.start_session("intake").expect("session");
        let state = engine.run_turn(state, None).state;
        let outcome = engine.run_turn(state, Some("Accounts payable"));
        assert_eq!(outcome.state.active_stage_id, "confirm_name");
        assert_eq!(
            outcome.reply(),
            Some("You said: Accounts payable\n\nIs this correct?")
        );

        assert_eq!(
            outcome.state.pending,
            Some(Pending::Confirm(PendingConfirm {
                confirm_id: "confirm_name".to_string(),
                ask: "Is this correct?".to_string(),
                summary_template: "You said: {{engagement.name}}".to_string(),
                on_yes: "end".to_string(),
                on_no: "welcome".to_string(),
            }))
        );

        let unclear = engine.run_turn(outcome.state.clone(), Some("maybe"));
        assert_eq!(unclear.state.active_stage_id, "confirm_name");
        assert!(matches!(unclear.state.pending, Some(Pending::Confirm(_))));

        let no = engine.run_turn(outcome.state.clone(), Some("No, fix the name"));
        assert_eq!(no.state.active_stage_id, "welcome");
        assert_eq!(no.reply(), Some("Process name?"));

        let yes = engine.run_turn(outcome.state, Some("Yes."));
        assert!(yes.is_complete());
        assert_eq!(yes.continuation, Continuation::End);
        assert_eq!(yes.reply(), Some("Interview complete. Thank you!"));
    }

    #[test]
    fn actions_feed_branches_through_last_result() {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "stages": [
                {"id": "welcome", "type": "action", "action": "decide", "next": "route"},
                {"id": "route", "type": "branch", "branches": [
                    {"when": {"action_result_equals": {"value": "left"}}, "next": "left"},
                    {"when": {"action_result_equals": {"value": "right"}}, "next": "right"}
                ]},
                {"id": "left", "type": "message", "next": "end"},
                {"id": "right", "type": "questions", "next": "end", "questions": [
                    {"id": "why", "ask": "Why right?", "save_to": "why"}
                ]}
            ]
        }))
        .expect("flow");
        let mut engine = engine_with_flow("branchy", flow);
        engine
            .actions_mut()
            .register_fn("decide", |slots: Value, _ctx: &ActionContext| {
                Ok(ActionOutcome::with_result(slots, "right"))
            });

        let state = engine.start_session("branchy").expect("session");
        let outcome = engine.run_turn(state, None);
        assert_eq!(outcome.state.active_stage_id, "right");
        assert_eq!(outcome.state.slots[LAST_ACTION_RESULT], "right");
        assert!(outcome
            .new_events()
            .iter()
            .any(|event| event.kind == EventKind::BranchRouted
                && event.field_str("next_stage_id") == Some("right")));
    }

    #[test]
    fn failing_action_records_error_and_keeps_state() {
        let flow = flow_of(
            vec![crate::test_support::action_stage("welcome", "explode", "end")],
            json!({"a": 1}),
        );
        let mut engine = engine_with_flow("boom", flow);
        engine
            .actions_mut()
            .register_fn("explode", |_slots: Value, _ctx: &ActionContext| {
                anyhow::bail!("kaboom")
            });

        let state = engine.start_session("boom").expect("session");
        let outcome = engine.run_turn(state, None);
        assert_eq!(outcome.continuation, Continuation::End);
        assert_eq!(outcome.state.retry_count, 1);
        assert_eq!(outcome.state.active_stage_id, "welcome");
        assert_eq!(outcome.state.slots, json!({"a": 1}));
        assert!(outcome
            .state
            .error
            .as_deref()
            .is_some_and(|error| error.contains("kaboom")));
        assert_eq!(
            outcome.new_events().last().map(|event| event.kind),
            Some(EventKind::TurnError)
        );

        // Further turns are refused until the error is cleared.
        let again = engine.run_turn(outcome.state, Some("hello"));
        assert_eq!(again.new_messages().len(), 0);
        assert_eq!(again.state.retry_count, 1);
    }

    #[test]
    fn budget_exhaustion_is_a_turn_error() {
        let flow = flow_of(
            vec![
                message_stage("welcome", "ping"),
                message_stage("ping", "welcome"),
            ],
            json!({}),
        );
        let engine = engine_with_flow("cycle", flow);
        let mut state = engine.start_session("cycle").expect("session");
        state.max_auto_advance_steps = 7;
        let outcome = engine.run_turn(state, None);

        assert_eq!(outcome.continuation, Continuation::End);
        let error = outcome.state.error.as_deref().expect("error");
        assert!(error.contains("max steps (7)"), "{error}");
        assert_eq!(outcome.state.auto_advance_count, 0);
        assert_eq!(outcome.state.active_stage_id, "welcome");
    }

    #[test]
    fn stage_missing_from_flow_is_reported() {
        let flow = flow_of(
            vec![questions_stage(
                "welcome",
                vec![question("q", "Anything?", "q")],
                "end",
            )],
            json!({}),
        );
        let engine = engine_with_flow("intake", flow);
        let mut state = engine.start_session("intake").expect("session");
        state.active_stage_id = "vanished".to_string();
        let outcome = engine.run_turn(state, None);
        assert!(outcome
            .state
            .error
            .as_deref()
            .is_some_and(|error| error.contains("stage 'vanished' not found")));
    }
}
