//! Built-in actions for capturing process workflows.
//!
//! Every action reads and writes the slot layout used by the bundled process
//! discovery flows:
//!
//! - `workflows.selected_workflows` / `workflows.maps`
//! - `workflow_capture_state.*` (active workflow, step buffers, cursors)
//! - `process_parameters.*` (data elements, decision rules)
//! - `validation.*` and `outputs.*`
//!
//! Actions are lenient about shapes: a missing container is created, and a
//! text answer stands in where a list is expected.

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::actions::{ActionContext, ActionOutcome, ActionRegistry};
use crate::core::intent::{DEFAULT_TABLES, mentions_any};
use crate::core::path;

const CAPTURE_STATE: &str = "workflow_capture_state";
const STEP_BUFFER: &str = "workflow_capture_state.active_step_buffer";
const MAX_DERIVED_ELEMENTS: usize = 20;

/// Step capture stages whose cursors restart when a new step is buffered.
pub const STEP_CAPTURE_STAGES: &[&str] = &[
    "workflow_ask_next_step",
    "workflow_step_capture__step_description",
    "workflow_step_capture__owner",
    "workflow_step_capture__inputs",
    "workflow_step_capture__outputs",
    "workflow_step_capture__systems",
    "workflow_step_capture__decision_wait_exception",
    "workflow_step_capture__wait_exception",
    "workflow_step_capture__decision_outcomes",
];

static STEP_PREFIX_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^(\d+[.)]?|-|\*|•)\s*").unwrap());
static DECISION_PREFIX_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)^(?:yes|no)[,.\s]+(?:the\s+)?(?:decision\s+(?:is|here)\s*:?\s*)?")
        .unwrap()
});
static OUTCOME_TYPED_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)^(.+?)\s*(?:-+>|→)\s*(next|end)\s*:\s*(.+)$").unwrap()
});
static OUTCOME_ARROW_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^(.+?)\s*(?:-+>|→)\s*(.+)$").unwrap());
static OUTCOME_DASH_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^(.+?)\s+-+\s+(.+)$").unwrap());
static TARGET_PREFIX_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)^(?:moves to|goes to|proceeds to|returns to|pauses for)\s+").unwrap()
});

const QUESTION_WORDS: &[&str] = &[
    "is", "are", "was", "does", "do", "did", "can", "could", "should", "will", "would", "has",
    "have", "what", "which", "who", "when", "where", "how", "whether",
];
const END_WORDS: &[&str] = &[
    "end", "ends", "close", "closed", "closes", "stop", "stops", "finish", "finished", "terminate",
    "terminates", "complete", "completed",
];
const CLOSE_WORDS: &[&str] = &["done", "complete", "finished"];

pub fn register_builtins(registry: &mut ActionRegistry) {
    registry.register(
        "initialize_workflow_maps_from_selection",
        initialize_workflow_maps_from_selection,
    );
    registry.register(
        "write_trigger_to_active_workflow",
        write_trigger_to_active_workflow,
    );
    registry.register(
        "parse_enumerated_steps_into_skeleton",
        parse_enumerated_steps_into_skeleton,
    );
    registry.register(
        "normalize_and_parse_decision_data",
        normalize_and_parse_decision_data,
    );
    registry.register("check_step_has_decision", check_step_has_decision);
    registry.register(
        "commit_step_to_active_workflow",
        commit_step_to_active_workflow,
    );
    registry.register("check_if_user_said_done", check_if_user_said_done);
    registry.register("copy_next_step_to_buffer", CopyNextStepToBuffer::default());
    registry.register(
        "advance_or_close_workflow_based_on_response",
        advance_or_close_workflow_based_on_response,
    );
    registry.register("apply_workflow_corrections", apply_workflow_corrections);
    registry.register(
        "activate_next_workflow_variant_or_finish",
        activate_next_workflow_variant_or_finish,
    );
    registry.register(
        "advance_to_next_step_or_finish",
        advance_to_next_step_or_finish,
    );
    registry.register(
        "normalize_and_expand_decision_rules",
        normalize_and_expand_decision_rules,
    );
    registry.register(
        "derive_candidate_data_elements",
        derive_candidate_data_elements,
    );
    registry.register(
        "select_next_data_element_for_validation",
        select_next_data_element_for_validation,
    );
    registry.register(
        "commit_validated_data_element",
        commit_validated_data_element,
    );
    registry.register(
        "detect_gaps_and_contradictions",
        detect_gaps_and_contradictions,
    );
    registry.register("score_automation_candidates", score_automation_candidates);
    registry.register(
        "generate_recommended_next_step",
        generate_recommended_next_step,
    );
}

/// Build one empty workflow map per selected workflow and activate the first.
pub fn initialize_workflow_maps_from_selection(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let selected = path::get(&slots, "workflows.selected_workflows")
        .map(text_items)
        .unwrap_or_default();
    let maps: Vec<Value> = selected
        .iter()
        .enumerate()
        .map(|(pos, name)| {
            json!({
                "workflow_id": format!("wf_{}", pos + 1),
                "workflow_name": name,
                "trigger": null,
                "start_condition": null,
                "end_condition": null,
                "lanes": [],
                "steps": [],
                "decisions": [],
                "exceptions": [],
                "wait_states": [],
                "artifacts_touched": [],
                "notes": []
            })
        })
        .collect();
    let active = maps
        .first()
        .map(|map| map["workflow_id"].clone())
        .unwrap_or(Value::Null);
    debug!(workflows = maps.len(), "initialized workflow maps");

    let root = ensure_object(&mut slots);
    object_entry(root, "workflows").insert("maps".to_string(), Value::Array(maps));
    object_entry(root, CAPTURE_STATE).insert("active_workflow_id".to_string(), active);
    Ok(ActionOutcome::slots(slots))
}

/// Copy trigger and boundary answers from the workflow-level buffer onto the
/// active workflow, then clear the buffer.
pub fn write_trigger_to_active_workflow(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let Some(active_id) = active_workflow_id(&slots) else {
        return Ok(ActionOutcome::slots(slots));
    };
    let Some(buffer) = path::get(&slots, "workflow_capture_state.workflow_level_buffer")
        .and_then(Value::as_object)
        .cloned()
    else {
        return Ok(ActionOutcome::slots(slots));
    };

    if let Some(workflow) = workflow_mut(&mut slots, &active_id) {
        for key in ["trigger", "start_condition", "end_condition"] {
            if let Some(value) = buffer.get(key).filter(|value| is_truthy(value)) {
                workflow.insert(key.to_string(), value.clone());
            }
        }
    }
    let root = ensure_object(&mut slots);
    object_entry(root, CAPTURE_STATE).insert(
        "workflow_level_buffer".to_string(),
        Value::Object(Map::new()),
    );
    Ok(ActionOutcome::slots(slots))
}

/// Split the enumerated step answer into a numbered step queue.
pub fn parse_enumerated_steps_into_skeleton(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let text = text_at(&slots, "workflow_capture_state.enumerated_steps");
    let names = parse_step_names(&text);
    debug!(steps = names.len(), "parsed enumerated steps");

    let root = ensure_object(&mut slots);
    let state = object_entry(root, CAPTURE_STATE);
    let queue: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(pos, name)| {
            json!({"step_number": pos + 1, "step_name": name, "details_captured": false})
        })
        .collect();
    let summary = if names.is_empty() {
        "No steps provided".to_string()
    } else {
        names
            .iter()
            .enumerate()
            .map(|(pos, name)| format!("{}. {name}", pos + 1))
            .collect::<Vec<_>>()
            .join("\n")
    };

    state.insert("step_queue".to_string(), Value::Array(queue));
    state.insert("current_step_index".to_string(), json!(0));
    state.insert("current_step_display".to_string(), json!(1));
    state.insert("step_count".to_string(), json!(names.len()));
    state.insert("step_list_summary".to_string(), Value::String(summary));
    if let Some(first) = names.first() {
        state.insert("current_step_name".to_string(), json!(first));
    }
    Ok(ActionOutcome::slots(slots))
}

/// Step names from a free-form list, with bullets and numbering removed.
///
/// Steps are separated by newlines or semicolons.
pub fn parse_step_names(text: &str) -> Vec<String> {
    text.split(['\n', ';'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| STEP_PREFIX_RE.replace(line, "").trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Normalize the buffered decision question and parse its outcomes.
pub fn normalize_and_parse_decision_data(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let decision = text_at(&slots, &format!("{STEP_BUFFER}.decision"));
    let outcomes = text_at(&slots, &format!("{STEP_BUFFER}.decision_outcomes"));

    let buffer = step_buffer(&mut slots);
    buffer.insert(
        "decision_normalized".to_string(),
        Value::String(normalize_decision_text(&decision)),
    );
    buffer.insert(
        "decision_outcomes_parsed".to_string(),
        Value::Array(parse_decision_outcomes(&outcomes)),
    );
    Ok(ActionOutcome::slots(slots))
}

/// Strip a leading yes/no and phrase the decision as a question.
pub fn normalize_decision_text(text: &str) -> String {
    let mut out = DECISION_PREFIX_RE.replace(text.trim(), "").trim().to_string();
    while out.ends_with("??") {
        out.pop();
    }
    let first_word = out
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !out.is_empty() && !out.ends_with('?') && QUESTION_WORDS.contains(&first_word.as_str()) {
        out.push('?');
    }
    out
}

/// Parse one outcome per line: `condition -> next: target`, `condition -> target`,
/// or `condition - target`.
pub fn parse_decision_outcomes(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_outcome_line)
        .collect()
}

fn parse_outcome_line(line: &str) -> Value {
    if let Some(caps) = OUTCOME_TYPED_RE.captures(line) {
        return json!({
            "condition": caps[1].trim(),
            "outcome_type": caps[2].to_lowercase(),
            "target": clean_target(&caps[3]),
        });
    }
    let split = OUTCOME_ARROW_RE
        .captures(line)
        .or_else(|| OUTCOME_DASH_RE.captures(line));
    match split {
        Some(caps) => {
            let target = clean_target(&caps[2]);
            let outcome_type = if mentions_any(&target, END_WORDS) {
                "end"
            } else {
                "next"
            };
            json!({"condition": caps[1].trim(), "outcome_type": outcome_type, "target": target})
        }
        None => json!({"condition": line, "outcome_type": "next", "target": ""}),
    }
}

fn clean_target(target: &str) -> String {
    TARGET_PREFIX_RE.replace(target.trim(), "").trim().to_string()
}

/// Decide whether the buffered step has a real decision point.
///
/// Result: `has_decision` or `no_decision`.
pub fn check_step_has_decision(mut slots: Value, _ctx: &ActionContext) -> Result<ActionOutcome> {
    let decision = text_at(&slots, &format!("{STEP_BUFFER}.decision"));
    let has_decision = !DEFAULT_TABLES.is_no_decision(&decision);

    let buffer = step_buffer(&mut slots);
    if !has_decision {
        buffer.insert("decision".to_string(), Value::String(String::new()));
    }
    buffer.insert("has_decision".to_string(), Value::Bool(has_decision));
    let result = if has_decision {
        "has_decision"
    } else {
        "no_decision"
    };
    Ok(ActionOutcome::with_result(slots, result))
}

/// Append the buffered step to the active workflow and clear the buffer.
///
/// A step whose description matches an existing step is dropped. The step
/// owner joins the workflow's lanes.
pub fn commit_step_to_active_workflow(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let Some(buffer) = path::get(&slots, STEP_BUFFER)
        .and_then(Value::as_object)
        .filter(|buffer| !buffer.is_empty())
        .cloned()
    else {
        return Ok(ActionOutcome::slots(slots));
    };
    let Some(active_id) = active_workflow_id(&slots) else {
        return Ok(ActionOutcome::slots(slots));
    };
    let description = buffer
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if description.is_empty() {
        return Ok(ActionOutcome::slots(slots));
    }
    let step_name = path::get_str(&slots, "workflow_capture_state.current_step_name")
        .map(str::to_string);

    let Some(workflow) = workflow_mut(&mut slots, &active_id) else {
        return Ok(ActionOutcome::slots(slots));
    };
    let steps = array_entry(workflow, "steps");
    let duplicate = steps.iter().any(|step| {
        step.get("description")
            .and_then(Value::as_str)
            .is_some_and(|existing| existing.trim().eq_ignore_ascii_case(&description))
    });
    if duplicate {
        debug!(workflow = %active_id, "skipping duplicate step");
    } else {
        let mut step = buffer.clone();
        if let Some(name) = step_name {
            step.insert("step_name".to_string(), Value::String(name));
        }
        steps.push(Value::Object(step));

        if let Some(owner) = buffer
            .get("owner_role")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
        {
            let lanes = array_entry(workflow, "lanes");
            if !lanes.iter().any(|lane| lane.as_str() == Some(owner)) {
                lanes.push(Value::String(owner.to_string()));
            }
        }
        debug!(workflow = %active_id, "committed step");
    }

    *step_buffer(&mut slots) = Map::new();
    Ok(ActionOutcome::slots(slots))
}

/// Result `done` when the next-step answer says there are no more steps,
/// else `continue`.
pub fn check_if_user_said_done(slots: Value, _ctx: &ActionContext) -> Result<ActionOutcome> {
    let response = text_at(&slots, "workflow_capture_state.next_step_response");
    let result = if DEFAULT_TABLES.said_done(&response) {
        "done"
    } else {
        "continue"
    };
    Ok(ActionOutcome::with_result(slots, result))
}

/// Start a fresh step buffer from the next-step answer and restart the step
/// capture questions.
#[derive(Debug, Clone)]
pub struct CopyNextStepToBuffer {
    pub reset_stages: Vec<String>,
}

impl Default for CopyNextStepToBuffer {
    fn default() -> Self {
        Self {
            reset_stages: STEP_CAPTURE_STAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl crate::actions::Action for CopyNextStepToBuffer {
    fn run(&self, mut slots: Value, _ctx: &ActionContext) -> Result<ActionOutcome> {
        let response = text_at(&slots, "workflow_capture_state.next_step_response");
        let buffer = step_buffer(&mut slots);
        *buffer = match json!({
            "description": response.trim(),
            "owner_role": "",
            "inputs": "",
            "outputs": "",
            "systems_tools_used": "",
            "decision": "",
            "decision_outcomes": [],
            "wait_or_delay": "",
            "common_exception": ""
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(ActionOutcome::slots(slots).resetting_cursors(self.reset_stages.iter().cloned()))
    }
}

/// Close the active workflow when the user says it is finished.
///
/// Result: `workflow_closed` or `continue_same_workflow`.
pub fn advance_or_close_workflow_based_on_response(
    mut slots: Value,
    ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let response = ctx.user_response.trim();
    if !mentions_any(response, CLOSE_WORDS) {
        return Ok(ActionOutcome::with_result(slots, "continue_same_workflow"));
    }
    if let Some(active_id) = active_workflow_id(&slots)
        && let Some(workflow) = workflow_mut(&mut slots, &active_id)
    {
        workflow.insert(
            "end_condition".to_string(),
            Value::String(response.to_string()),
        );
    }
    Ok(ActionOutcome::with_result(slots, "workflow_closed"))
}

/// Record the user's correction as a validation gap to resolve.
pub fn apply_workflow_corrections(mut slots: Value, ctx: &ActionContext) -> Result<ActionOutcome> {
    let correction = ctx.user_response.trim();
    if correction.is_empty() {
        return Ok(ActionOutcome::slots(slots));
    }
    let root = ensure_object(&mut slots);
    let validation = object_entry(root, "validation");
    array_entry(validation, "gaps").push(json!({
        "type": "user_correction",
        "stage_id": ctx.stage_id,
        "detail": correction,
    }));
    Ok(ActionOutcome::slots(slots))
}

/// Activate the workflow after the active one.
///
/// Result: `variant_activated`, or `all_variants_done` when none is left.
pub fn activate_next_workflow_variant_or_finish(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let ids: Vec<String> = path::get(&slots, "workflows.maps")
        .and_then(Value::as_array)
        .map(|maps| {
            maps.iter()
                .filter_map(|map| map.get("workflow_id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let next = match active_workflow_id(&slots) {
        Some(active) => ids
            .iter()
            .position(|id| *id == active)
            .and_then(|pos| ids.get(pos + 1)),
        None => ids.first(),
    };
    let Some(next) = next.cloned() else {
        return Ok(ActionOutcome::with_result(slots, "all_variants_done"));
    };

    let root = ensure_object(&mut slots);
    object_entry(root, CAPTURE_STATE)
        .insert("active_workflow_id".to_string(), Value::String(next));
    Ok(ActionOutcome::with_result(slots, "variant_activated"))
}

/// Move the step cursor to the next queued step.
///
/// Result: `next_step`, or `all_steps_done` after the last one.
pub fn advance_to_next_step_or_finish(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let index = path::get(&slots, "workflow_capture_state.current_step_index")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let queue: Vec<Value> = path::get(&slots, "workflow_capture_state.step_queue")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let next = usize::try_from(index + 1).unwrap_or(usize::MAX);
    let Some(step) = queue.get(next) else {
        return Ok(ActionOutcome::with_result(slots, "all_steps_done"));
    };

    let root = ensure_object(&mut slots);
    let state = object_entry(root, CAPTURE_STATE);
    state.insert("current_step_index".to_string(), json!(next));
    state.insert("current_step_display".to_string(), json!(next + 1));
    state.insert(
        "current_step_name".to_string(),
        step.get("step_name").cloned().unwrap_or(Value::Null),
    );
    Ok(ActionOutcome::with_result(slots, "next_step"))
}

/// Turn free-text decision rules into a list of rule objects.
pub fn normalize_and_expand_decision_rules(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let rules: Vec<Value> = match path::get(&slots, "process_parameters.decision_rules") {
        Some(Value::String(text)) => parse_step_names(text)
            .into_iter()
            .map(|rule| json!({"rule": rule}))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => Some(item.clone()),
                other => value_text(other).map(|rule| json!({"rule": rule})),
            })
            .collect(),
        _ => Vec::new(),
    };
    let root = ensure_object(&mut slots);
    object_entry(root, "process_parameters")
        .insert("decision_rules".to_string(), Value::Array(rules));
    Ok(ActionOutcome::slots(slots))
}

/// Collect candidate data elements from the inputs and outputs of captured steps.
///
/// Existing elements are kept; new names are added once, case-insensitively.
pub fn derive_candidate_data_elements(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let mut elements: Vec<Value> = path::get(&slots, "process_parameters.data_elements")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut seen: HashSet<String> = elements
        .iter()
        .filter_map(|element| element.get("name").and_then(Value::as_str))
        .map(str::to_lowercase)
        .collect();

    let workflows = path::get(&slots, "workflows.maps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    'collect: for workflow in &workflows {
        let steps = workflow.get("steps").and_then(Value::as_array);
        for step in steps.into_iter().flatten() {
            let source = step
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            for key in ["inputs", "outputs"] {
                for name in step.get(key).map(text_items).unwrap_or_default() {
                    if elements.len() >= MAX_DERIVED_ELEMENTS {
                        break 'collect;
                    }
                    if seen.insert(name.to_lowercase()) {
                        elements.push(json!({
                            "name": name,
                            "source_step": source,
                            "definition": null,
                            "validated": false,
                        }));
                    }
                }
            }
        }
    }
    debug!(elements = elements.len(), "derived data elements");

    let root = ensure_object(&mut slots);
    let params = object_entry(root, "process_parameters");
    params.insert("data_elements".to_string(), Value::Array(elements));
    params.insert("current_data_element_index".to_string(), Value::Null);
    Ok(ActionOutcome::slots(slots))
}

/// Point `current_data_element_index` at the first element still needing a
/// definition, or null when every element is validated.
///
/// Result: `element_selected` or `all_validated`.
pub fn select_next_data_element_for_validation(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let next = path::get(&slots, "process_parameters.data_elements")
        .and_then(Value::as_array)
        .and_then(|elements| {
            elements.iter().position(|element| {
                element.get("validated").and_then(Value::as_bool) != Some(true)
                    || element.get("definition").is_none_or(Value::is_null)
            })
        });

    let root = ensure_object(&mut slots);
    object_entry(root, "process_parameters").insert(
        "current_data_element_index".to_string(),
        next.map_or(Value::Null, |index| json!(index)),
    );
    let result = if next.is_some() {
        "element_selected"
    } else {
        "all_validated"
    };
    Ok(ActionOutcome::with_result(slots, result))
}

/// Mark the current data element as validated.
pub fn commit_validated_data_element(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let outcome = path::set(
        &mut slots,
        "process_parameters.data_elements[current].validated",
        Value::Bool(true),
    );
    debug!(?outcome, "committed data element");
    Ok(ActionOutcome::slots(slots))
}

/// List missing boundaries, empty workflows, and unowned steps.
///
/// Result: `gaps_found` or `no_gaps`.
pub fn detect_gaps_and_contradictions(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let mut gaps = Vec::new();
    let workflows = path::get(&slots, "workflows.maps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for workflow in &workflows {
        let name = workflow
            .get("workflow_name")
            .and_then(Value::as_str)
            .unwrap_or("unnamed workflow");
        if !workflow.get("end_condition").is_some_and(is_truthy) {
            gaps.push(format!("Workflow '{name}' has no end condition"));
        }
        let steps = workflow
            .get("steps")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if steps.is_empty() {
            gaps.push(format!("Workflow '{name}' has no captured steps"));
        }
        for step in steps {
            if !step.get("owner_role").is_some_and(is_truthy) {
                let description = step
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed step");
                gaps.push(format!("Step '{description}' in '{name}' has no owner"));
            }
        }
    }

    let result = if gaps.is_empty() { "no_gaps" } else { "gaps_found" };
    let root = ensure_object(&mut slots);
    object_entry(root, "validation").insert("detected_gaps".to_string(), json!(gaps));
    Ok(ActionOutcome::with_result(slots, result))
}

/// Rank captured steps by how easy they look to automate.
///
/// Steps already using a system, without a decision, and without waits score
/// higher. The top three are kept.
pub fn score_automation_candidates(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let workflows = path::get(&slots, "workflows.maps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut scored: Vec<(u64, String)> = Vec::new();
    for workflow in &workflows {
        for step in workflow
            .get("steps")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(description) = step.get("description").and_then(Value::as_str) else {
                continue;
            };
            let score = [
                step.get("systems_tools_used").is_some_and(is_truthy),
                !step.get("decision").is_some_and(is_truthy),
                !step.get("wait_or_delay").is_some_and(is_truthy),
            ]
            .into_iter()
            .filter(|hit| *hit)
            .count() as u64;
            scored.push((score, description.to_string()));
        }
    }
    // Stable sort keeps capture order among equal scores.
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    let candidates: Vec<Value> = scored
        .into_iter()
        .take(3)
        .map(|(score, step)| json!({"step": step, "score": score}))
        .collect();

    let root = ensure_object(&mut slots);
    object_entry(root, "outputs")
        .insert("automation_candidates".to_string(), Value::Array(candidates));
    Ok(ActionOutcome::slots(slots))
}

/// Summarize what the team should do next.
pub fn generate_recommended_next_step(
    mut slots: Value,
    _ctx: &ActionContext,
) -> Result<ActionOutcome> {
    let gaps = path::get(&slots, "validation.detected_gaps")
        .map(text_items)
        .unwrap_or_default();
    let top_candidate = path::get_str(&slots, "outputs.automation_candidates[0].step")
        .map(str::to_string);

    let recommendation = if let Some(first_gap) = gaps.first() {
        format!(
            "Close {} open gap(s) with the process owner, starting with: {first_gap}",
            gaps.len()
        )
    } else if let Some(step) = top_candidate {
        format!("Pilot automation for the step \"{step}\"")
    } else {
        "Review the captured process map with stakeholders".to_string()
    };

    let root = ensure_object(&mut slots);
    object_entry(root, "outputs").insert(
        "recommended_next_step".to_string(),
        Value::String(recommendation),
    );
    Ok(ActionOutcome::slots(slots))
}

/// Borrow `value` as an object, replacing anything else with `{}` first.
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => {
            *value = Value::Object(Map::new());
            ensure_object(value)
        }
    }
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    ensure_object(map.entry(key).or_insert(Value::Null))
}

fn array_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Vec<Value> {
    ensure_array(map.entry(key).or_insert(Value::Null))
}

fn ensure_array(value: &mut Value) -> &mut Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => {
            *value = Value::Array(Vec::new());
            ensure_array(value)
        }
    }
}

fn step_buffer(slots: &mut Value) -> &mut Map<String, Value> {
    let root = ensure_object(slots);
    object_entry(object_entry(root, CAPTURE_STATE), "active_step_buffer")
}

fn active_workflow_id(slots: &Value) -> Option<String> {
    path::get_str(slots, "workflow_capture_state.active_workflow_id").map(str::to_string)
}

fn workflow_mut<'a>(slots: &'a mut Value, workflow_id: &str) -> Option<&'a mut Map<String, Value>> {
    slots
        .pointer_mut("/workflows/maps")?
        .as_array_mut()?
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .find(|workflow| workflow.get("workflow_id").and_then(Value::as_str) == Some(workflow_id))
}

/// Text at `path`; list items are joined with newlines.
fn text_at(slots: &Value, path_text: &str) -> String {
    match path::get(slots, path_text) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Non-empty entries of a list, or of a comma/newline separated string.
fn text_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_text).collect(),
        Value::String(text) => text
            .split(['\n', ',', ';'])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}
