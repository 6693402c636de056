//! `{placeholder}` substitution for agent inputs.
//!
//! Crew task descriptions and workflow `input_template`s reference earlier
//! results by name. Placeholders whose key the lookup does not know are kept
//! verbatim, so literal braces in prompts survive rendering.

use serde_json::Value;
use std::collections::HashMap;

/// Render `template`, replacing each `{key}` for which `lookup` returns a value.
///
/// Keys may not contain braces or whitespace; anything else between braces is
/// copied through untouched.
pub fn render<F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                let replacement = if is_key(key) { lookup(key) } else { None };
                match replacement {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Render against a map of JSON values. Strings are inserted raw, other
/// values in their JSON form.
pub fn render_with_values(template: &str, values: &HashMap<String, Value>) -> String {
    render(template, |key| values.get(key).map(value_to_text))
}

/// Text form of a JSON value as inserted into prompts.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_key(key: &str) -> bool {
    !key.is_empty() && !key.chars().any(char::is_whitespace)
}
