//! Dotted slot paths: parsing, reading, and auto-vivifying writes.
//!
//! A path is a dot-separated list of segments. Each segment may carry one
//! bracketed index:
//!
//! - `items[2]` is a literal zero-based index.
//! - `items[current]` resolves through a sibling key of `items` in the same
//!   container: `current_<key without trailing s>_index`, then
//!   `<key>_current_index`.
//! - `items[@state.idx]` resolves the index from another path, read from the
//!   slot root.
//!
//! Reads never fail: anything unresolvable is "no value". Writes never fail
//! either; an unresolvable write reports [`WriteOutcome::Skipped`] and leaves
//! the slots unchanged.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpec {
    Literal(usize),
    Current,
    Ref(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub key: String,
    pub index: Option<IndexSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidPath,
    UnresolvedIndex,
    NotContainer,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::InvalidPath => "invalid_path",
            SkipReason::UnresolvedIndex => "unresolved_index",
            SkipReason::NotContainer => "not_container",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The leaf was created or replaced.
    Set,
    /// The leaf was an existing list and the value was appended to it.
    Appended,
    Skipped(SkipReason),
}

/// Parse a path into segments. Returns `None` for malformed paths.
pub fn parse(path: &str) -> Option<Vec<Segment>> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut raw_segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (pos, ch) in path.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            '.' if depth == 0 => {
                raw_segments.push(&path[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    raw_segments.push(&path[start..]);

    raw_segments.into_iter().map(parse_segment).collect()
}

fn parse_segment(raw: &str) -> Option<Segment> {
    let Some(open) = raw.find('[') else {
        if raw.is_empty() || raw.contains(']') {
            return None;
        }
        return Some(Segment {
            key: raw.to_string(),
            index: None,
        });
    };

    let key = &raw[..open];
    let inner = raw[open + 1..].strip_suffix(']')?;
    if key.is_empty() {
        return None;
    }

    let index = if inner == "current" {
        IndexSpec::Current
    } else if let Some(reference) = inner.strip_prefix('@') {
        if reference.is_empty() {
            return None;
        }
        IndexSpec::Ref(reference.to_string())
    } else {
        IndexSpec::Literal(inner.parse().ok()?)
    };

    Some(Segment {
        key: key.to_string(),
        index: Some(index),
    })
}

/// Read the value at `path`. Explicit nulls read as "no value".
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    let mut current = root;
    for segment in &segments {
        let map = current.as_object()?;
        current = match &segment.index {
            None => map.get(&segment.key)?,
            Some(spec) => {
                let index = resolve_index(root, map, &segment.key, spec)?;
                map.get(&segment.key)?.as_array()?.get(index)?
            }
        };
    }
    (!current.is_null()).then_some(current)
}

/// Read the value at `path` as a string.
pub fn get_str<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get(root, path).and_then(Value::as_str)
}

/// Write `value` at `path`, creating intermediate containers as needed.
///
/// Missing or null intermediates become a list when the segment carries an
/// index and an object otherwise.
/// Intermediate lists are padded with empty objects, leaf lists with nulls.
/// Writing a non-list value to a key that already holds a list appends.
/// Indices resolved through `current` or `@ref` never extend a list.
/// An unresolvable write changes nothing.
pub fn set(root: &mut Value, path: &str, value: Value) -> WriteOutcome {
    let Some(segments) = parse(path) else {
        return WriteOutcome::Skipped(SkipReason::InvalidPath);
    };
    // Every check runs against the untouched tree, so a skipped write never
    // leaves half-built intermediates behind.
    let refs = match resolve_refs(root, &segments) {
        Ok(refs) => refs,
        Err(reason) => return WriteOutcome::Skipped(reason),
    };
    if let Err(reason) = check_writable(root, &segments, &refs) {
        return WriteOutcome::Skipped(reason);
    }
    write(root, &segments, &refs, value)
}

fn resolve_refs(root: &Value, segments: &[Segment]) -> Result<Vec<Option<usize>>, SkipReason> {
    segments
        .iter()
        .map(|segment| match &segment.index {
            Some(IndexSpec::Ref(reference)) => get(root, reference)
                .and_then(as_index)
                .map(Some)
                .ok_or(SkipReason::UnresolvedIndex),
            _ => Ok(None),
        })
        .collect()
}

/// Walk the existing tree the way [`write`] will, without creating anything.
///
/// `None` for `current` means the walk has left the existing tree and every
/// further container would be freshly created.
fn check_writable(
    root: &Value,
    segments: &[Segment],
    refs: &[Option<usize>],
) -> Result<(), SkipReason> {
    let mut current = Some(root);
    for (segment, resolved_ref) in segments.iter().zip(refs) {
        let map = match current {
            None => {
                // Fresh objects and lists are empty: only literal indices fit.
                if !matches!(segment.index, None | Some(IndexSpec::Literal(_))) {
                    return Err(SkipReason::UnresolvedIndex);
                }
                continue;
            }
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SkipReason::NotContainer),
        };
        let existing = map.get(&segment.key).filter(|value| !value.is_null());
        current = match &segment.index {
            None => existing,
            Some(spec) => {
                let target = write_index(map, &segment.key, spec, *resolved_ref)
                    .ok_or(SkipReason::UnresolvedIndex)?;
                let items: &[Value] = match existing {
                    None => &[],
                    Some(Value::Array(items)) => items,
                    Some(_) => return Err(SkipReason::NotContainer),
                };
                if !fits(items, target) {
                    return Err(SkipReason::UnresolvedIndex);
                }
                items.get(target.index)
            }
        };
    }
    Ok(())
}

fn write(
    root: &mut Value,
    segments: &[Segment],
    refs: &[Option<usize>],
    value: Value,
) -> WriteOutcome {
    let Some((leaf, parents)) = segments.split_last() else {
        return WriteOutcome::Skipped(SkipReason::InvalidPath);
    };

    let mut current = root;
    for (pos, segment) in parents.iter().enumerate() {
        let Value::Object(map) = current else {
            return WriteOutcome::Skipped(SkipReason::NotContainer);
        };
        current = match &segment.index {
            None => {
                let slot = map.entry(segment.key.clone()).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = Value::Object(Map::new());
                }
                slot
            }
            Some(spec) => {
                let Some(target) = write_index(map, &segment.key, spec, refs[pos]) else {
                    return WriteOutcome::Skipped(SkipReason::UnresolvedIndex);
                };
                let slot = map.entry(segment.key.clone()).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = Value::Array(Vec::new());
                }
                let Value::Array(items) = slot else {
                    return WriteOutcome::Skipped(SkipReason::NotContainer);
                };
                if !fits(items, target) {
                    return WriteOutcome::Skipped(SkipReason::UnresolvedIndex);
                }
                while items.len() <= target.index {
                    items.push(Value::Object(Map::new()));
                }
                &mut items[target.index]
            }
        };
    }

    let Value::Object(map) = current else {
        return WriteOutcome::Skipped(SkipReason::NotContainer);
    };
    match &leaf.index {
        Some(spec) => {
            let Some(target) = write_index(map, &leaf.key, spec, refs[segments.len() - 1]) else {
                return WriteOutcome::Skipped(SkipReason::UnresolvedIndex);
            };
            let slot = map.entry(leaf.key.clone()).or_insert(Value::Null);
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(items) = slot else {
                return WriteOutcome::Skipped(SkipReason::NotContainer);
            };
            if !fits(items, target) {
                return WriteOutcome::Skipped(SkipReason::UnresolvedIndex);
            }
            while items.len() <= target.index {
                items.push(Value::Null);
            }
            items[target.index] = value;
            WriteOutcome::Set
        }
        None => {
            if let Some(Value::Array(items)) = map.get_mut(&leaf.key)
                && !value.is_array()
            {
                items.push(value);
                return WriteOutcome::Appended;
            }
            map.insert(leaf.key.clone(), value);
            WriteOutcome::Set
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WriteIndex {
    index: usize,
    /// Literal indices may grow the list; dynamic ones must already exist.
    may_extend: bool,
}

fn fits(items: &[Value], target: WriteIndex) -> bool {
    target.may_extend || target.index < items.len()
}

fn write_index(
    map: &Map<String, Value>,
    key: &str,
    spec: &IndexSpec,
    resolved_ref: Option<usize>,
) -> Option<WriteIndex> {
    match spec {
        IndexSpec::Literal(index) => Some(WriteIndex {
            index: *index,
            may_extend: true,
        }),
        IndexSpec::Current => current_index(map, key).map(|index| WriteIndex {
            index,
            may_extend: false,
        }),
        IndexSpec::Ref(_) => resolved_ref.map(|index| WriteIndex {
            index,
            may_extend: false,
        }),
    }
}

fn resolve_index(
    root: &Value,
    map: &Map<String, Value>,
    key: &str,
    spec: &IndexSpec,
) -> Option<usize> {
    match spec {
        IndexSpec::Literal(index) => Some(*index),
        IndexSpec::Current => current_index(map, key),
        IndexSpec::Ref(reference) => get(root, reference).and_then(as_index),
    }
}

/// Resolve `[current]` for `key` from its sibling index keys in `map`.
///
/// `current_<singular>_index` wins when present, even if it holds null.
pub fn current_index(map: &Map<String, Value>, key: &str) -> Option<usize> {
    let singular = key.trim_end_matches('s');
    let primary = format!("current_{singular}_index");
    if let Some(value) = map.get(&primary) {
        return as_index(value);
    }
    map.get(&format!("{key}_current_index")).and_then(as_index)
}

fn as_index(value: &Value) -> Option<usize> {
    value.as_u64().and_then(|index| usize::try_from(index).ok())
}
