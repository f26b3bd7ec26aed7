//! Semantic invariants not expressible via JSON Schema.

use crate::core::{path, template};
use crate::flow::{FlowDefinition, StageKind, TERMINAL_STAGE};
use std::collections::HashSet;

/// Check semantic invariants of a flow:
/// - No duplicate stage ids
/// - No duplicate question ids within a stage
/// - Entry stage exists
/// - Every transition names a declared stage or the terminal stage
/// - Questions stages ask at least one question
/// - Action stages name an action
/// - Slot paths and template placeholders parse
pub fn validate_flow(flow: &FlowDefinition) -> Vec<String> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();
    for stage in &flow.stages {
        if !ids.insert(stage.id.as_str()) {
            errors.push(format!("duplicate stage id '{}'", stage.id));
        }
    }

    let entry = flow.entry_stage();
    if entry != TERMINAL_STAGE && !ids.contains(entry) {
        errors.push(format!("entry stage '{entry}' is not declared"));
    }

    for stage in &flow.stages {
        for target in stage.kind.successors() {
            if target != TERMINAL_STAGE && !ids.contains(target) {
                errors.push(format!(
                    "{}: transition to unknown stage '{target}'",
                    stage.id
                ));
            }
        }

        match &stage.kind {
            StageKind::Questions { questions, .. } => {
                if questions.is_empty() {
                    errors.push(format!("{}: questions stage has no questions", stage.id));
                }
                let mut question_ids = HashSet::new();
                for question in questions {
                    if !question_ids.insert(question.id.as_str()) {
                        errors.push(format!(
                            "{}: duplicate question id '{}'",
                            stage.id, question.id
                        ));
                    }
                    if !question.save_to.is_empty() && path::parse(&question.save_to).is_none() {
                        errors.push(format!(
                            "{}/{}: invalid save_to path '{}'",
                            stage.id, question.id, question.save_to
                        ));
                    }
                    check_template(&question.ask, &format!("{}/{}", stage.id, question.id), &mut errors);
                }
            }
            StageKind::Action { action, .. } => {
                if action.trim().is_empty() {
                    errors.push(format!("{}: action stage has no action name", stage.id));
                }
            }
            StageKind::Confirm {
                ask,
                summary_template,
                ..
            } => {
                check_template(ask, &stage.id, &mut errors);
                check_template(summary_template, &stage.id, &mut errors);
            }
            StageKind::Gate { criteria, .. } => {
                for criterion in criteria {
                    if path::parse(&criterion.slot).is_none() {
                        errors.push(format!(
                            "{}: invalid criterion slot '{}'",
                            stage.id, criterion.slot
                        ));
                    }
                    if let (Some(min), Some(max)) = (criterion.min_items, criterion.max_items)
                        && min > max
                    {
                        errors.push(format!(
                            "{}: criterion '{}' has min_items {} > max_items {}",
                            stage.id, criterion.slot, min, max
                        ));
                    }
                }
            }
            StageKind::Loop {
                stop_condition: Some(cond),
                ..
            } => {
                if let Some(signal) = cond.signal_slot.as_deref()
                    && path::parse(signal).is_none()
                {
                    errors.push(format!("{}: invalid signal_slot '{signal}'", stage.id));
                }
            }
            _ => {}
        }

        if let Some(prompt) = stage.prompt.as_deref() {
            check_template(prompt, &stage.id, &mut errors);
        }
    }

    errors
}

fn check_template(text: &str, location: &str, errors: &mut Vec<String>) {
    for placeholder in template::placeholders(text) {
        if path::parse(placeholder).is_none() {
            errors.push(format!("{location}: invalid placeholder '{{{{{placeholder}}}}}'"));
        }
    }
}
