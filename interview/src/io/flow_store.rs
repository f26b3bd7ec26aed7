//! Flow loading with schema + invariant validation and a shared cache.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use jsonschema::validator_for;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::invariants::validate_flow;
use crate::flow::{FlowDefinition, Stage};
use crate::io::config::EngineConfig;

const FLOW_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/flow/v1.schema.json"
));

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown flow id '{0}'")]
    UnknownFlow(String),
    #[error("flow '{flow_id}' file not found: {}", path.display())]
    FlowFileMissing { flow_id: String, path: PathBuf },
    #[error("flow '{flow_id}' could not be parsed: {message}")]
    FlowParseError { flow_id: String, message: String },
    #[error("flow '{flow_id}' failed validation: {}", errors.join("; "))]
    InvalidFlow { flow_id: String, errors: Vec<String> },
    #[error("stage '{stage_id}' not found in flow '{flow_id}'")]
    StageNotFound { flow_id: String, stage_id: String },
}

/// Resolves flow ids to validated, immutable flow definitions.
///
/// Definitions are parsed once and shared; readers never observe a partially
/// loaded flow.
#[derive(Debug)]
pub struct FlowStore {
    flows_dir: PathBuf,
    files: BTreeMap<String, String>,
    cache: RwLock<HashMap<String, Arc<FlowDefinition>>>,
}

impl FlowStore {
    pub fn new(flows_dir: impl Into<PathBuf>, files: BTreeMap<String, String>) -> Self {
        Self {
            flows_dir: flows_dir.into(),
            files,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.flows_dir.clone(), config.flows.clone())
    }

    /// Store with no file mapping; flows must be added with [`FlowStore::insert`].
    pub fn in_memory() -> Self {
        Self::new(PathBuf::new(), BTreeMap::new())
    }

    /// Known flow ids: mapped files plus inserted definitions.
    pub fn flow_ids(&self) -> Vec<String> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = self.files.keys().cloned().collect();
        ids.extend(cache.keys().filter(|id| !self.files.contains_key(*id)).cloned());
        ids.sort();
        ids
    }

    /// Validate `flow` and register it under `flow_id`, replacing any cached copy.
    pub fn insert(
        &self,
        flow_id: &str,
        flow: FlowDefinition,
    ) -> Result<Arc<FlowDefinition>, FlowError> {
        let errors = validate_flow(&flow);
        if !errors.is_empty() {
            return Err(FlowError::InvalidFlow {
                flow_id: flow_id.to_string(),
                errors,
            });
        }
        let flow = Arc::new(flow);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flow_id.to_string(), Arc::clone(&flow));
        Ok(flow)
    }

    /// Load a flow by id, reading and validating its file on first use.
    #[instrument(skip(self))]
    pub fn load(&self, flow_id: &str) -> Result<Arc<FlowDefinition>, FlowError> {
        if let Some(flow) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(flow_id)
        {
            return Ok(Arc::clone(flow));
        }

        let file = self
            .files
            .get(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        let path = self.flows_dir.join(file);
        let flow = Arc::new(read_flow(flow_id, &path)?);

        // Another reader may have loaded the same file meanwhile; keep the first.
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let flow = cache
            .entry(flow_id.to_string())
            .or_insert(flow)
            .clone();
        debug!(flow_id, stages = flow.stages.len(), "flow loaded");
        Ok(flow)
    }

    /// Stage `stage_id` of flow `flow_id`.
    pub fn stage(&self, flow_id: &str, stage_id: &str) -> Result<Stage, FlowError> {
        let flow = self.load(flow_id)?;
        flow.stage(stage_id)
            .cloned()
            .ok_or_else(|| FlowError::StageNotFound {
                flow_id: flow_id.to_string(),
                stage_id: stage_id.to_string(),
            })
    }

    /// A fresh copy of the flow's slot template. Sessions never share it.
    pub fn initial_slots(&self, flow_id: &str) -> Result<Value, FlowError> {
        let flow = self.load(flow_id)?;
        Ok(match &flow.context.slots {
            Value::Null => Value::Object(Map::new()),
            slots => slots.clone(),
        })
    }
}

/// Read, schema-check, deserialize, and invariant-check one flow file.
pub fn read_flow(flow_id: &str, path: &Path) -> Result<FlowDefinition, FlowError> {
    debug!(flow_id, path = %path.display(), "reading flow file");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(FlowError::FlowFileMissing {
                flow_id: flow_id.to_string(),
                path: path.to_path_buf(),
            });
        }
        Err(err) => {
            return Err(parse_error(flow_id, format!("read {}: {err}", path.display())));
        }
    };
    parse_flow(flow_id, &contents)
}

/// Parse flow JSON text, validating schema then invariants.
pub fn parse_flow(flow_id: &str, contents: &str) -> Result<FlowDefinition, FlowError> {
    let value: Value =
        serde_json::from_str(contents).map_err(|err| parse_error(flow_id, err.to_string()))?;
    validate_schema(flow_id, &value)?;
    let flow: FlowDefinition =
        serde_json::from_value(value).map_err(|err| parse_error(flow_id, err.to_string()))?;
    let errors = validate_flow(&flow);
    if !errors.is_empty() {
        return Err(FlowError::InvalidFlow {
            flow_id: flow_id.to_string(),
            errors,
        });
    }
    Ok(flow)
}

fn validate_schema(flow_id: &str, flow: &Value) -> Result<(), FlowError> {
    let schema: Value = serde_json::from_str(FLOW_SCHEMA)
        .map_err(|err| parse_error(flow_id, format!("invalid flow schema: {err}")))?;
    let compiled = validator_for(&schema)
        .map_err(|err| parse_error(flow_id, format!("invalid flow schema: {err}")))?;
    if !compiled.is_valid(flow) {
        let messages = compiled
            .iter_errors(flow)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(parse_error(
            flow_id,
            format!("schema validation failed: {}", messages.join("; ")),
        ));
    }
    Ok(())
}

fn parse_error(flow_id: &str, message: String) -> FlowError {
    FlowError::FlowParseError {
        flow_id: flow_id.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_flow(dir: &Path, file: &str, value: &Value) {
        fs::write(dir.join(file), serde_json::to_string_pretty(value).expect("json"))
            .expect("write flow");
    }

    fn store_for(dir: &Path) -> FlowStore {
        let files = [("intake", "intake.json"), ("ghost", "ghost.json")]
            .into_iter()
            .map(|(id, file)| (id.to_string(), file.to_string()))
            .collect();
        FlowStore::new(dir, files)
    }

    fn intake_flow() -> Value {
        json!({
            "stages": [
                {"id": "welcome", "type": "message", "next": "basics"},
                {"id": "basics", "type": "questions", "next": "end", "questions": [
                    {"id": "name", "ask": "Process name?", "save_to": "engagement.name"}
                ]}
            ],
            "context": {"slots": {"engagement": {"name": null}}}
        })
    }

    #[test]
    fn loads_and_caches_flows() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_flow(temp.path(), "intake.json", &intake_flow());
        let store = store_for(temp.path());

        let first = store.load("intake").expect("load");
        // Removing the file proves the second load is served from the cache.
        fs::remove_file(temp.path().join("intake.json")).expect("remove");
        let second = store.load("intake").expect("cached load");
        assert!(Arc::ptr_eq(&first, &second));

        let stage = store.stage("intake", "basics").expect("stage");
        assert_eq!(stage.kind.name(), "questions");
    }

    #[test]
    fn reports_typed_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_flow(temp.path(), "intake.json", &intake_flow());
        let store = store_for(temp.path());

        assert!(matches!(store.load("nope"), Err(FlowError::UnknownFlow(_))));
        assert!(matches!(
            store.load("ghost"),
            Err(FlowError::FlowFileMissing { .. })
        ));
        assert!(matches!(
            store.stage("intake", "missing"),
            Err(FlowError::StageNotFound { .. })
        ));
    }

    #[test]
    fn schema_violations_are_parse_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_flow(
            temp.path(),
            "intake.json",
            &json!({"stages": [{"id": "welcome", "type": "teleport"}]}),
        );
        let store = store_for(temp.path());
        let err = store.load("intake").expect_err("schema error");
        assert!(matches!(err, FlowError::FlowParseError { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_flow("broken", "{ not json").expect_err("parse error");
        assert!(matches!(err, FlowError::FlowParseError { .. }));
    }

    #[test]
    fn dangling_references_are_invalid() {
        let err = parse_flow(
            "dangling",
            r#"{"stages": [{"id": "welcome", "type": "message", "next": "nowhere"}]}"#,
        )
        .expect_err("invalid flow");
        match err {
            FlowError::InvalidFlow { errors, .. } => assert!(errors[0].contains("nowhere")),
            other => panic!("expected InvalidFlow, got {other}"),
        }
    }

    #[test]
    fn initial_slots_are_independent_copies() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_flow(temp.path(), "intake.json", &intake_flow());
        let store = store_for(temp.path());

        let mut first = store.initial_slots("intake").expect("slots");
        first["engagement"]["name"] = json!("changed");
        let second = store.initial_slots("intake").expect("slots");
        assert_eq!(second, json!({"engagement": {"name": null}}));
    }

    #[test]
    fn insert_validates_in_memory_flows() {
        let store = FlowStore::in_memory();
        let flow: FlowDefinition = serde_json::from_value(intake_flow()).expect("flow");
        store.insert("intake", flow).expect("insert");
        assert_eq!(store.flow_ids(), vec!["intake".to_string()]);
        assert_eq!(
            store.load("intake").expect("load").entry_stage(),
            "welcome"
        );
    }
}
