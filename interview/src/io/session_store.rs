//! Session state persistence between turns.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::session::SessionState;

/// Load a session from disk.
pub fn load_session(path: &Path) -> Result<SessionState> {
    debug!(path = %path.display(), "loading session");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let state: SessionState = serde_json::from_str(&contents)
        .with_context(|| format!("parse session {}", path.display()))?;
    debug!(
        flow_id = %state.flow_id,
        stage = %state.active_stage_id,
        messages = state.messages.len(),
        "session loaded"
    );
    Ok(state)
}

/// Atomically write a session to disk (temp file + rename).
pub fn write_session(path: &Path, state: &SessionState) -> Result<()> {
    debug!(path = %path.display(), stage = %state.active_stage_id, "writing session");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("session path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp session {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace session {}", path.display()))?;
    Ok(())
}
