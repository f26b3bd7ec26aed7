//! Clarification rules for question answers.

use crate::core::intent::{IntentTables, YesNo};
use crate::flow::{ClarifyCondition, ClarifyRule};

/// True when `answer` meets `condition`. Empty answers meet every known condition.
pub fn condition_met(
    condition: ClarifyCondition,
    answer: &str,
    min_chars: usize,
    tables: &IntentTables,
) -> bool {
    let answer = answer.trim();
    if matches!(condition, ClarifyCondition::Unknown) {
        return false;
    }
    if answer.is_empty() {
        return true;
    }
    match condition {
        ClarifyCondition::EmptyOrTooShort => answer.chars().count() < min_chars,
        ClarifyCondition::Vague => tables.is_vague(answer),
        ClarifyCondition::UnclearYesNo => tables.classify_yes_no(answer) == YesNo::Unclear,
        ClarifyCondition::Unknown => false,
    }
}

/// First rule in declaration order whose condition `answer` meets.
pub fn first_triggered<'a>(
    rules: &'a [ClarifyRule],
    answer: &str,
    min_chars: usize,
    tables: &IntentTables,
) -> Option<&'a ClarifyRule> {
    rules
        .iter()
        .find(|rule| condition_met(rule.condition, answer, min_chars, tables))
}

/// Value stored for a clarified answer: the original answer and the follow-up
/// reply joined by a newline.
pub fn combine_answers(original: &str, follow_up: &str) -> String {
    if original.is_empty() {
        follow_up.to_string()
    } else {
        format!("{original}\n{follow_up}")
    }
}
