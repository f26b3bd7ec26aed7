//! Next-stage decisions for a single stage.
//!
//! These functions only decide; the turn pipeline applies the transition and
//! owns every side effect.

use crate::core::intent::{IntentTables, YesNo};
use crate::core::path;
use crate::flow::{Criterion, Stage, StageKind, StopCondition, TERMINAL_STAGE};
use serde_json::Value;

/// Inputs a transition may depend on besides the slots.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvanceInput<'a> {
    pub user_response: Option<&'a str>,
    pub last_action_result: Option<&'a str>,
}

/// Stage id that follows `stage`.
///
/// Confirm stages stay on themselves when the answer is unclear so the
/// question is asked again. Branch stages take the first branch whose
/// condition matches the last action result, else their first branch, else
/// the terminal stage. Loop stages return their `next`; whether to stop is
/// decided with [`loop_should_stop`].
pub fn next_stage<'a>(
    stage: &'a Stage,
    slots: &Value,
    input: AdvanceInput<'_>,
    tables: &IntentTables,
) -> &'a str {
    match &stage.kind {
        StageKind::Message { next }
        | StageKind::Questions { next, .. }
        | StageKind::Action { next, .. }
        | StageKind::Output { next }
        | StageKind::Loop { next, .. } => next,
        StageKind::Confirm { on_yes, on_no, .. } => {
            match tables.classify_yes_no(input.user_response.unwrap_or_default()) {
                YesNo::Yes => on_yes,
                YesNo::No => on_no,
                YesNo::Unclear => &stage.id,
            }
        }
        StageKind::Gate {
            criteria,
            on_pass,
            on_fail,
        } => {
            if gate_passes(criteria, slots) {
                on_pass
            } else {
                on_fail
            }
        }
        StageKind::Branch { branches } => branches
            .iter()
            .find(|branch| branch.when.matches(input.last_action_result))
            .or_else(|| branches.first())
            .map(|branch| branch.next.as_str())
            .unwrap_or(TERMINAL_STAGE),
    }
}

/// True when every criterion holds.
///
/// A required slot must resolve to a value. `min_items` also fails when the
/// slot does not hold a list; `max_items` only applies to lists.
pub fn gate_passes(criteria: &[Criterion], slots: &Value) -> bool {
    criteria.iter().all(|criterion| criterion_holds(criterion, slots))
}

fn criterion_holds(criterion: &Criterion, slots: &Value) -> bool {
    let value = path::get(slots, &criterion.slot);
    if criterion.required && value.is_none() {
        return false;
    }
    let items = value.and_then(Value::as_array);
    if let Some(min) = criterion.min_items
        && items.is_none_or(|items| items.len() < min)
    {
        return false;
    }
    if let (Some(max), Some(items)) = (criterion.max_items, items)
        && items.len() > max
    {
        return false;
    }
    true
}

/// True when the loop should exit: its signal slot is missing or holds null.
///
/// A loop without a signal slot never exits on its own.
pub fn loop_should_stop(stop_condition: Option<&StopCondition>, slots: &Value) -> bool {
    match stop_condition.and_then(|cond| cond.signal_slot.as_deref()) {
        Some(signal) => path::get(slots, signal).is_none(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intent::DEFAULT_TABLES;
    use crate::flow::{Branch, BranchCondition, ExpectedValue};
    use serde_json::json;

    fn stage(id: &str, kind: StageKind) -> Stage {
        Stage {
            id: id.to_string(),
            prompt: None,
            kind,
        }
    }

    fn confirm() -> Stage {
        stage(
            "confirm_scope",
            StageKind::Confirm {
                ask: "Is this correct?".to_string(),
                summary_template: String::new(),
                on_yes: "next_section".to_string(),
                on_no: "edit_scope".to_string(),
            },
        )
    }

    fn answer(text: &str) -> AdvanceInput<'_> {
        AdvanceInput {
            user_response: Some(text),
            last_action_result: None,
        }
    }

    #[test]
    fn confirm_routes_on_yes_no_and_repeats_when_unclear() {
        let stage = confirm();
        let slots = json!({});
        assert_eq!(
            next_stage(&stage, &slots, answer("Yes, that's right"), &DEFAULT_TABLES),
            "next_section"
        );
        assert_eq!(
            next_stage(&stage, &slots, answer("No, fix the third item"), &DEFAULT_TABLES),
            "edit_scope"
        );
        assert_eq!(
            next_stage(&stage, &slots, answer("maybe"), &DEFAULT_TABLES),
            "confirm_scope"
        );
    }

    #[test]
    fn gate_checks_required_and_item_bounds() {
        let gate = stage(
            "gate",
            StageKind::Gate {
                criteria: vec![
                    Criterion {
                        slot: "engagement.name".to_string(),
                        required: true,
                        min_items: None,
                        max_items: None,
                    },
                    Criterion {
                        slot: "workflows.selected".to_string(),
                        required: true,
                        min_items: Some(1),
                        max_items: Some(2),
                    },
                ],
                on_pass: "pass".to_string(),
                on_fail: "fail".to_string(),
            },
        );
        let input = AdvanceInput::default();

        let passing = json!({"engagement": {"name": "AP"}, "workflows": {"selected": ["a"]}});
        assert_eq!(next_stage(&gate, &passing, input, &DEFAULT_TABLES), "pass");

        let too_many = json!({"engagement": {"name": "AP"}, "workflows": {"selected": ["a", "b", "c"]}});
        assert_eq!(next_stage(&gate, &too_many, input, &DEFAULT_TABLES), "fail");

        let null_name = json!({"engagement": {"name": null}, "workflows": {"selected": ["a"]}});
        assert_eq!(next_stage(&gate, &null_name, input, &DEFAULT_TABLES), "fail");

        let not_a_list = json!({"engagement": {"name": "AP"}, "workflows": {"selected": "a"}});
        assert_eq!(next_stage(&gate, &not_a_list, input, &DEFAULT_TABLES), "fail");
    }

    #[test]
    fn min_items_fails_on_empty_or_missing_lists() {
        let criteria = [Criterion {
            slot: "items".to_string(),
            required: false,
            min_items: Some(1),
            max_items: None,
        }];
        assert!(!gate_passes(&criteria, &json!({"items": []})));
        assert!(!gate_passes(&criteria, &json!({})));
        assert!(gate_passes(&criteria, &json!({"items": ["x"]})));

        let optional = [Criterion {
            slot: "notes".to_string(),
            required: false,
            min_items: None,
            max_items: Some(1),
        }];
        assert!(gate_passes(&optional, &json!({})));
    }

    #[test]
    fn branch_matches_last_action_result_then_falls_back() {
        let branch = stage(
            "route",
            StageKind::Branch {
                branches: vec![
                    Branch {
                        when: BranchCondition {
                            action_result_equals: Some(ExpectedValue {
                                value: json!("continue"),
                            }),
                        },
                        next: "capture_step".to_string(),
                    },
                    Branch {
                        when: BranchCondition {
                            action_result_equals: Some(ExpectedValue { value: json!("done") }),
                        },
                        next: "wrap_up".to_string(),
                    },
                ],
            },
        );
        let slots = json!({});
        let with_result = |result| AdvanceInput {
            user_response: None,
            last_action_result: Some(result),
        };
        assert_eq!(
            next_stage(&branch, &slots, with_result("done"), &DEFAULT_TABLES),
            "wrap_up"
        );
        assert_eq!(
            next_stage(&branch, &slots, with_result("continue"), &DEFAULT_TABLES),
            "capture_step"
        );
        assert_eq!(
            next_stage(&branch, &slots, with_result("unexpected"), &DEFAULT_TABLES),
            "capture_step"
        );

        let empty = stage("route", StageKind::Branch { branches: Vec::new() });
        assert_eq!(
            next_stage(&empty, &slots, AdvanceInput::default(), &DEFAULT_TABLES),
            TERMINAL_STAGE
        );
    }

    #[test]
    fn loop_stops_when_signal_slot_is_absent_or_null() {
        let cond = StopCondition {
            signal_slot: Some("params.current_data_element_index".to_string()),
        };
        assert!(!loop_should_stop(
            Some(&cond),
            &json!({"params": {"current_data_element_index": 0}})
        ));
        assert!(loop_should_stop(
            Some(&cond),
            &json!({"params": {"current_data_element_index": null}})
        ));
        assert!(loop_should_stop(Some(&cond), &json!({})));
        assert!(!loop_should_stop(None, &json!({})));
    }
}
