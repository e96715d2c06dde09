//! `{{path.to.value}}` placeholder resolution against shared state.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

use crate::context::SharedState;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Resolves every placeholder in `template`.
///
/// Strings are visited recursively through arrays and objects. A resolved
/// string value is substituted as-is, any other value as its JSON text.
/// Placeholders whose path does not resolve are left untouched.
#[must_use]
pub fn resolve_template(template: &Value, state: &SharedState) -> Value {
    match template {
        Value::String(s) => Value::String(resolve_str(s, state)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_template(v, state)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_template(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolves the placeholders of a single string.
#[must_use]
pub fn resolve_str(template: &str, state: &SharedState) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match state.lookup(&caps[1]) {
            Some(Value::String(s)) => s,
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Returns the distinct placeholder paths referenced by `template`.
#[must_use]
pub fn placeholders(template: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_placeholders(template, &mut found);
    found
}

fn collect_placeholders(template: &Value, found: &mut Vec<String>) {
    match template {
        Value::String(s) => {
            for caps in PLACEHOLDER.captures_iter(s) {
                let path = caps[1].to_string();
                if !found.contains(&path) {
                    found.push(path);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_placeholders(v, found)),
        _ => {}
    }
}
