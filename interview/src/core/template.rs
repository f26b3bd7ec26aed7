//! `{{path}}` placeholder substitution.
//!
//! Placeholders are resolved with [`crate::core::path::get`]. The renderer is
//! lookup-only: no conditionals, loops, or filters.

use crate::core::path;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{\{([^}]+)\}\}").unwrap());

/// Substitute every `{{path}}` in `template` from `slots`.
///
/// Strings render verbatim, lists and objects as compact JSON, other scalars
/// by their JSON text. Unresolved placeholders render as `[path]` so missing
/// data stays visible.
pub fn render(template: &str, slots: &Value) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path_text = caps[1].trim();
            match path::get(slots, path_text) {
                Some(value) => stringify(value).into_owned(),
                None => format!("[{path_text}]"),
            }
        })
        .into_owned()
}

/// Paths referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .collect()
}

fn stringify(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        other => Cow::Owned(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_scalars_lists_and_missing_paths() {
        let slots = json!({
            "engagement": {"process_name": "Invoicing", "team_size": 4},
            "workflows": {"selected": ["a", "b"]}
        });
        let rendered = render(
            "Mapping {{engagement.process_name}} ({{ engagement.team_size }} people): \
             {{workflows.selected}} owned by {{engagement.owner}}",
            &slots,
        );
        assert_eq!(
            rendered,
            "Mapping Invoicing (4 people): [\"a\",\"b\"] owned by [engagement.owner]"
        );
    }

    #[test]
    fn renders_indexed_paths() {
        let slots = json!({"maps": [{"name": "Returns"}]});
        assert_eq!(render("Steps of {{maps[0].name}}?", &slots), "Steps of Returns?");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render("Plain { text }", &json!({})), "Plain { text }");
    }

    #[test]
    fn placeholders_lists_referenced_paths() {
        assert_eq!(
            placeholders("{{a.b}} and {{ c[0] }}"),
            vec!["a.b", "c[0]"]
        );
    }
}
