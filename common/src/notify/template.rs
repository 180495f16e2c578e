// `{{path.to.value}}` templating over notification payloads

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}").unwrap())
}

/// Replaces every `{{path.to.value}}` in `input` with the value found at that
/// dotted path in `context`. Unresolved placeholders are left verbatim.
pub fn replace_variables(input: &str, context: &Value) -> String {
    placeholder_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match lookup(context, &caps[1]) {
                Some(value) => scalar_to_string(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Renders a JSON-shaped template against the context: every string value,
/// including array elements, gets placeholder substitution. Returns `None`
/// when the template is not valid JSON; the caller falls back to the default
/// payload.
pub fn render_template(template: &str, context: &Value) -> Option<Value> {
    let mut rendered: Value = serde_json::from_str(template).ok()?;
    substitute(&mut rendered, context);
    Some(rendered)
}

fn substitute(value: &mut Value, context: &Value) {
    match value {
        Value::String(s) => *s = replace_variables(s, context),
        Value::Array(items) => {
            for item in items {
                substitute(item, context);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute(v, context);
            }
        }
        _ => {}
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |value, key| value.get(key))
}

/// Converts a looked-up value into its in-string representation: numbers in
/// decimal, booleans as `true`/`false`, strings as-is, anything complex as
/// its JSON encoding. Times are already RFC3339 strings in the context.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
