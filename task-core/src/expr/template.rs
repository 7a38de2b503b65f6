//! The `{{ .path }}` template engine. Renders a `TaskConfig`
//! field or any JSON-like value against a variable bag in one of two modes:
//! `text` (always produces a string) or `json` (preserves native types when
//! the whole template is a single expression).

use super::expression::Evaluator;
use crate::error::ExpressionError;
use serde_json::Value as Json;

/// Render `template` to a string, substituting every `{{ expr }}` occurrence
/// with the stringified result of evaluating `expr`.
pub fn render_text(
    evaluator: &Evaluator,
    template: &str,
    vars: &Json,
) -> Result<String, ExpressionError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated tag: emit verbatim, matching the teacher's
            // lenient handling of malformed trailing template syntax.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let expr_text = after[..end].trim();
        let value = evaluator.evaluate_value(expr_text, vars)?;
        out.push_str(&json_to_text(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render `template` preserving native JSON types when the template is
/// exactly one `{{ expr }}` tag (nothing else around it) — so `Items =
/// "{{ .input.cities }}"` yields an array, not the literal string form.
pub fn render_json(
    evaluator: &Evaluator,
    template: &str,
    vars: &Json,
) -> Result<Json, ExpressionError> {
    let trimmed = template.trim();
    if let Some(inner) = single_tag(trimmed) {
        return evaluator.evaluate_value(inner, vars);
    }
    render_text(evaluator, template, vars).map(Json::String)
}

/// Returns `Some(expr)` if `s` is exactly one `{{ expr }}` tag and nothing else.
fn single_tag(s: &str) -> Option<&str> {
    let s = s.strip_prefix("{{")?;
    let s = s.strip_suffix("}}")?;
    if s.contains("{{") || s.contains("}}") {
        return None;
    }
    Some(s.trim())
}

fn json_to_text(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

/// Recursively render every string leaf of a JSON tree in `json` mode,
/// preserving native types for single-expression strings ("recursion
/// into map and slice payloads"). Used to normalize `TaskConfig.With`/`Env`
/// maps and arbitrary nested payloads (memory messages, router routes).
pub fn render_value_recursive(
    evaluator: &Evaluator,
    value: &Json,
    vars: &Json,
) -> Result<Json, ExpressionError> {
    match value {
        Json::String(s) => render_json(evaluator, s, vars),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_value_recursive(evaluator, item, vars)?);
            }
            Ok(Json::Array(out))
        }
        Json::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value_recursive(evaluator, v, vars)?);
            }
            Ok(Json::Object(out))
        }
        other => Ok(other.clone()),
    }
}
