//! Turn behavior at stage boundaries: writes, gates, cursors, and the loop guard.

use interview::flow::{ClarifyCondition, Criterion, StageKind};
use interview::session::{EventKind, Pending};
use interview::test_support::{
    confirm_stage, engine_with_flow, flow_of, question, question_with_clarify, questions_stage,
    stage,
};
use interview::turn::{Continuation, Engine};
use serde_json::json;

fn first_turn(engine: &Engine, flow_id: &str) -> interview::session::SessionState {
    let state = engine.start_session(flow_id).expect("session");
    engine.run_turn(state, None).state
}

#[test]
fn answers_create_missing_intermediate_objects() {
    let flow = flow_of(
        vec![questions_stage(
            "welcome",
            vec![question("deep", "Tell me something deep.", "a.b.c")],
            "end",
        )],
        json!({"seed": true}),
    );
    let engine = engine_with_flow("deep", flow);
    let state = first_turn(&engine, "deep");

    let outcome = engine.run_turn(state, Some("bottom"));
    assert_eq!(outcome.state.slots["a"]["b"]["c"], "bottom");
    assert_eq!(outcome.state.slots["seed"], true);
    assert!(outcome.is_complete());
}

#[test]
fn answers_to_list_slots_are_appended() {
    let flow = flow_of(
        vec![questions_stage(
            "welcome",
            vec![question("tool", "Which tool do you use most?", "tools")],
            "end",
        )],
        json!({"tools": ["email"]}),
    );
    let engine = engine_with_flow("tools", flow);
    let state = first_turn(&engine, "tools");

    let outcome = engine.run_turn(state, Some("spreadsheets"));
    assert_eq!(outcome.state.slots["tools"], json!(["email", "spreadsheets"]));
}

#[test]
fn gate_sends_incomplete_slots_back_to_questions() {
    let flow = flow_of(
        vec![
            questions_stage(
                "welcome",
                vec![question("team", "Who is on the team?", "team.members")],
                "check",
            ),
            stage(
                "check",
                StageKind::Gate {
                    criteria: vec![Criterion {
                        slot: "team.members".to_string(),
                        required: true,
                        min_items: Some(2),
                        max_items: None,
                    }],
                    on_pass: "end".to_string(),
                    on_fail: "welcome".to_string(),
                },
            ),
        ],
        json!({"team": {"members": []}}),
    );
    let engine = engine_with_flow("team", flow);
    let state = first_turn(&engine, "team");

    let once = engine.run_turn(state, Some("Ana"));
    assert_eq!(once.state.active_stage_id, "welcome");
    assert_eq!(once.reply(), Some("Who is on the team?"));
    assert!(
        once.new_events()
            .iter()
            .any(|event| event.kind == EventKind::GateRouted
                && event.field_str("next_stage_id") == Some("welcome"))
    );

    let twice = engine.run_turn(once.state, Some("Ben"));
    assert!(twice.is_complete());
    assert_eq!(twice.state.slots["team"]["members"], json!(["Ana", "Ben"]));
}

#[test]
fn last_question_moves_to_next_stage_and_clears_cursor() {
    let flow = flow_of(
        vec![
            questions_stage(
                "welcome",
                vec![
                    question("one", "First question here?", "answers.one"),
                    question("two", "Second question here?", "answers.two"),
                    question("three", "Third question here?", "answers.three"),
                ],
                "closing",
            ),
            questions_stage(
                "closing",
                vec![question("anything", "Anything else to add?", "answers.extra")],
                "end",
            ),
        ],
        json!({"answers": {}}),
    );
    let engine = engine_with_flow("three", flow);
    let mut state = first_turn(&engine, "three");

    for answer in ["alpha", "bravo"] {
        state = engine.run_turn(state, Some(answer)).state;
    }
    assert_eq!(state.question_cursor.get("welcome"), Some(&2));

    let outcome = engine.run_turn(state, Some("charlie"));
    assert_eq!(outcome.state.active_stage_id, "closing");
    assert!(!outcome.state.question_cursor.contains_key("welcome"));
    assert_eq!(outcome.reply(), Some("Anything else to add?"));
    assert_eq!(outcome.state.slots["answers"]["three"], "charlie");
}

#[test]
fn clarification_combines_both_answers() {
    let flow = flow_of(
        vec![questions_stage(
            "welcome",
            vec![question_with_clarify(
                "owner",
                "Who owns the process?",
                "process.owner",
                ClarifyCondition::Vague,
                "Which team exactly?",
            )],
            "end",
        )],
        json!({"process": {}}),
    );
    let engine = engine_with_flow("clarify", flow);
    let state = first_turn(&engine, "clarify");

    let follow_up = engine.run_turn(state, Some("probably finance"));
    assert_eq!(follow_up.reply(), Some("Which team exactly?"));
    assert!(matches!(
        follow_up.state.pending,
        Some(Pending::Question(ref q)) if q.is_clarifying
    ));
    assert!(follow_up.state.slots["process"].get("owner").is_none());

    let done = engine.run_turn(follow_up.state, Some("Accounts payable"));
    assert!(done.is_complete());
    let owner = done.state.slots["process"]["owner"]
        .as_str()
        .expect("owner saved");
    assert!(owner.contains("probably finance"));
    assert!(owner.contains("Accounts payable"));
}

#[test]
fn repeated_prompt_forces_the_session_forward() {
    let flow = flow_of(
        vec![
            confirm_stage("review", "Here is the draft process map.", "after", "review"),
            questions_stage(
                "after",
                vec![question("next", "What happens after approval?", "after")],
                "end",
            ),
        ],
        json!({}),
    );
    let engine = engine_with_flow("stuck", flow);
    let mut state = first_turn(&engine, "stuck");
    for _ in 0..2 {
        state = engine.run_turn(state, Some("no")).state;
        assert_eq!(state.active_stage_id, "review");
    }

    // The same confirmation has now been shown three times.
    let outcome = engine.run_turn(state, Some("no"));
    assert_eq!(outcome.continuation, Continuation::Continue);
    assert_eq!(outcome.state.active_stage_id, "after");
    assert_eq!(outcome.state.pending, None);
    assert_eq!(outcome.reply(), Some("Thanks — moving on."));
    assert!(
        outcome
            .new_events()
            .iter()
            .any(|event| event.kind == EventKind::LoopDetectedForceAdvance
                && event.field_str("next_stage_id") == Some("after"))
    );

    let next = engine.run_turn(outcome.state, None);
    assert_eq!(next.reply(), Some("What happens after approval?"));
}

#[test]
fn stale_pending_answer_is_ignored() {
    let flow = flow_of(
        vec![
            questions_stage(
                "welcome",
                vec![question("name", "Process name?", "process.name")],
                "second",
            ),
            questions_stage(
                "second",
                vec![question("owner", "Who owns it?", "process.owner")],
                "end",
            ),
        ],
        json!({"process": {}}),
    );
    let engine = engine_with_flow("stale", flow);
    let mut state = first_turn(&engine, "stale");
    state.active_stage_id = "second".to_string();

    let outcome = engine.run_turn(state, Some("Invoicing"));
    assert!(outcome.state.slots["process"].get("name").is_none());
    assert!(
        outcome
            .new_events()
            .iter()
            .any(|event| event.kind == EventKind::AnswerIgnored)
    );
    assert_eq!(outcome.reply(), Some("Who owns it?"));
}
