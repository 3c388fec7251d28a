//! Placeholder substitution for literal templates.
//!
//! Two flavours share this module:
//! - [`substitute`]: `$name`, `${name}` and `$$` (a literal dollar). Any other
//!   `$` is an error.
//! - [`interpolate`]: `${dotted.path}` expressions only, walking into nested
//!   objects and arrays. A bare `$` is kept as is.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use widgetry_common::{EngineError, Vars};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$(?:(?P<escaped>\$)|(?P<named>[_a-z][_a-z0-9]*)|\{(?P<braced>[_a-z][_a-z0-9]*)\}|(?P<invalid>))",
    )
    .expect("PLACEHOLDER: invalid regex pattern")
});

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*(?P<path>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}")
        .expect("EXPRESSION: invalid regex pattern")
});

/// Replace `$name` / `${name}` placeholders with values from `vars`.
///
/// Fails with [`EngineError::MissingVariable`] when a name has no value and
/// with [`EngineError::InvalidPlaceholder`] on a `$` that starts no
/// placeholder.
pub fn substitute(template: &str, vars: &Vars) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&template[last..whole.start]);
        last = whole.end;

        if caps.name("escaped").is_some() {
            out.push('$');
            continue;
        }
        let name = match caps.name("named").or_else(|| caps.name("braced")) {
            Some(name) => name.as_str(),
            None => return Err(EngineError::InvalidPlaceholder(whole.start)),
        };
        let value = vars
            .get(name)
            .ok_or_else(|| EngineError::MissingVariable(name.to_string()))?;
        push_value(&mut out, value);
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Replace `${dotted.path}` expressions with values looked up in `vars`.
pub fn interpolate(template: &str, vars: &Vars) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in EXPRESSION.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.name("path")) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        let value = lookup(vars, path.as_str())
            .ok_or_else(|| EngineError::MissingVariable(path.as_str().to_string()))?;
        push_value(&mut out, value);
    }

    out.push_str(&template[last..]);
    Ok(out)
}

fn lookup<'a>(vars: &'a Vars, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Values render as their JSON text: null is empty and booleans stay
/// lowercase (`true`, not `True`).
fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(text) => out.push_str(text),
        other => out.push_str(&other.to_string()),
    }
}
