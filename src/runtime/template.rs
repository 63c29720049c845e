/// Template resolution for `{{...}}` placeholders
///
/// Two namespaces are supported:
/// - `{{input.<path>}}` reads from the run's input context
/// - `{{$json.<nodeId>.<path>}}` reads from the output of a completed upstream node
///
/// A placeholder that cannot be resolved stays in the output verbatim, so a user
/// inspecting a run can see exactly which value failed to bind.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::LazyLock;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder regex is valid"));

/// Resolve every placeholder in `template`
///
/// Each placeholder is looked up independently. Strings are inserted as-is;
/// other JSON values are inserted in their JSON text form.
pub fn resolve(template: &str, user_inputs: &Map<String, Value>, prior_results: &Map<String, Value>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| {
            match lookup(&caps[1], user_inputs, prior_results) {
                Some(value) => stringify(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Build a request body from a body template
///
/// An empty template (no keys, or null) forwards `user_inputs` unchanged. Otherwise
/// every string leaf is resolved and everything else is kept as-is.
pub fn build_request_body(
    template: &Value,
    user_inputs: &Map<String, Value>,
    prior_results: &Map<String, Value>,
) -> Value {
    let is_empty = match template {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Value::Object(user_inputs.clone());
    }
    resolve_value(template, user_inputs, prior_results)
}

/// Resolve every string leaf of a JSON value, preserving structure
pub fn resolve_value(value: &Value, user_inputs: &Map<String, Value>, prior_results: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve(s, user_inputs, prior_results)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, user_inputs, prior_results))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, user_inputs, prior_results)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Follow a dot-separated path through nested objects and arrays
///
/// Array elements are addressed by numeric segments ("items.0.id").
/// Returns `None` as soon as a segment does not exist.
pub fn get_nested_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup<'a>(
    expr: &str,
    user_inputs: &'a Map<String, Value>,
    prior_results: &'a Map<String, Value>,
) -> Option<&'a Value> {
    if let Some(path) = expr.strip_prefix("input.") {
        let (key, rest) = split_first(path);
        let root = user_inputs.get(key)?;
        return get_nested_value(root, rest);
    }
    if let Some(path) = expr.strip_prefix("$json.") {
        let (node_id, rest) = split_first(path);
        let root = prior_results.get(node_id)?;
        return get_nested_value(root, rest);
    }
    None
}

fn split_first(path: &str) -> (&str, &str) {
    path.split_once('.').unwrap_or((path, ""))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
