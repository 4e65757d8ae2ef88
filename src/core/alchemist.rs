//! The Alchemist: a Jinja-subset template resolver.
//!
//! Grounded on spec §4.2 and the filter/binary-sentinel semantics of
//! `examples/original_source/src/velm/parser_core/parser/parser_scribes/scaffold_scribes/jinja_scribe.py`
//! and `core/blueprint_scribe/content_renderer.py` (base64 seeds force
//! binary handling downstream).

use crate::core::error::RiteError;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Result of resolving one template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmuted {
    pub text: String,
    pub is_binary: bool,
}

/// A single parsed `{{ ... }}` expression's source span, for diagnostics.
struct ExprSpan {
    start: usize,
    line: usize,
    col: usize,
}

/// Replace every `{{ expr }}` in `text` against `context`. Fails fast on the
/// first unresolved identifier or malformed expression; never partially
/// substitutes.
pub fn transmute(text: &str, context: &Value) -> Result<Transmuted, RiteError> {
    let mut out = String::with_capacity(text.len());
    let mut is_binary = false;
    let mut rest = text;
    let mut consumed = 0usize;

    loop {
        let Some(open) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close_rel) = after_open.find("}}") else {
            let (line, col) = line_col(text, consumed + open);
            return Err(RiteError::ParseHeresy {
                line,
                col,
                detail: "unterminated template expression".to_string(),
            });
        };
        let expr_src = &after_open[..close_rel];
        let span = ExprSpan {
            start: consumed + open,
            line: 0,
            col: 0,
        };
        let (line, col) = line_col(text, span.start);
        let value = eval_expression(expr_src.trim(), context, line, col)?;
        if value.binary {
            is_binary = true;
        }
        out.push_str(&value.rendered);

        consumed += open + 2 + close_rel + 2;
        rest = &after_open[close_rel + 2..];
    }

    Ok(Transmuted { text: out, is_binary })
}

/// Static pre-scan for every top-level identifier referenced by `{{ ... }}`
/// expressions. Does not evaluate filters or check types.
pub fn discover_variables(text: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut rest = text;
    loop {
        let Some(open) = rest.find("{{") else { break };
        let after_open = &rest[open + 2..];
        let Some(close_rel) = after_open.find("}}") else { break };
        let expr_src = after_open[..close_rel].trim();
        if let Some(ident) = expr_src.split('|').next() {
            let ident = ident.trim();
            let root = ident.split('.').next().unwrap_or(ident);
            if is_identifier(root) {
                names.insert(root.to_string());
            }
        }
        rest = &after_open[close_rel + 2..];
    }
    names
}

struct FilterOutput {
    rendered: String,
    binary: bool,
}

fn eval_expression(
    expr_src: &str,
    context: &Value,
    line: usize,
    col: usize,
) -> Result<FilterOutput, RiteError> {
    let mut parts = expr_src.split('|');
    let ident = parts.next().unwrap_or("").trim();
    if ident.is_empty() || !is_identifier(ident.split('.').next().unwrap_or(ident)) {
        return Err(RiteError::ParseHeresy {
            line,
            col,
            detail: format!("malformed expression '{expr_src}'"),
        });
    }

    let mut default_value: Option<String> = None;
    let filters: Vec<&str> = parts.collect();
    for raw in &filters {
        let (name, _) = split_filter(raw.trim());
        if name == "default" {
            let (_, args) = split_filter(raw.trim());
            if let Some(arg) = args.first() {
                default_value = Some(unquote(arg));
            }
        }
    }

    let resolved = lookup_dotted(context, ident);
    let mut current = match resolved {
        Some(value) => json_to_display(&value),
        None => match default_value.clone() {
            Some(d) => d,
            None => {
                return Err(RiteError::MissingGnosis {
                    name: ident.to_string(),
                    line,
                    col,
                })
            }
        },
    };

    let mut binary = false;
    for raw in filters {
        let (name, args) = split_filter(raw.trim());
        if name == "default" {
            continue;
        }
        current = apply_filter(name, &args, &current, line, col, &mut binary)?;
    }

    Ok(FilterOutput { rendered: current, binary })
}

fn apply_filter(
    name: &str,
    args: &[String],
    input: &str,
    line: usize,
    col: usize,
    binary: &mut bool,
) -> Result<String, RiteError> {
    match name {
        "upper" => Ok(input.to_uppercase()),
        "lower" => Ok(input.to_lowercase()),
        "trim" => Ok(input.trim().to_string()),
        "quote" => Ok(format!("\"{}\"", input.replace('"', "\\\""))),
        "snake_case" => Ok(to_snake_case(input)),
        "kebab_case" => Ok(to_snake_case(input).replace('_', "-")),
        "pascal_case" => Ok(to_pascal_case(input)),
        "slug" => Ok(to_snake_case(input).replace('_', "-")),
        "replace" => {
            if args.len() != 2 {
                return Err(RiteError::ParseHeresy {
                    line,
                    col,
                    detail: "replace(from, to) requires exactly two arguments".to_string(),
                });
            }
            Ok(input.replace(args[0].as_str(), args[1].as_str()))
        }
        "base64" => {
            *binary = true;
            Ok(base64::engine::general_purpose::STANDARD.encode(input.as_bytes()))
        }
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            Ok(format!("{:x}", hasher.finalize()))
        }
        other => Err(RiteError::ParseHeresy {
            line,
            col,
            detail: format!("unknown filter '{other}'"),
        }),
    }
}

fn split_filter(raw: &str) -> (&str, Vec<String>) {
    let Some(colon) = raw.find(':') else {
        return (raw, Vec::new());
    };
    let name = &raw[..colon];
    let args_src = &raw[colon + 1..];
    let args = args_src
        .split(',')
        .map(|a| unquote(a.trim()))
        .collect();
    (name, args)
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 {
        let first = raw.chars().next().unwrap();
        let last = raw.chars().last().unwrap();
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_string()
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().unwrap().is_ascii_alphabetic()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn lookup_dotted(context: &Value, dotted: &str) -> Option<Value> {
    let mut current = context;
    for segment in dotted.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn json_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_snake_case(input: &str) -> String {
    let mut out = String::new();
    let mut prev_lower_or_digit = false;
    for ch in input.chars() {
        if ch.is_whitespace() || ch == '-' {
            out.push('_');
            prev_lower_or_digit = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower_or_digit {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
        prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
    }
    out
}

fn to_pascal_case(input: &str) -> String {
    to_snake_case(input)
        .split('_')
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn line_col(text: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for ch in text[..byte_offset.min(text.len())].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_plain_identifier() {
        let ctx = json!({"project_name": "widget"});
        let result = transmute("Hello {{ project_name }}!", &ctx).unwrap();
        assert_eq!(result.text, "Hello widget!");
        assert!(!result.is_binary);
    }

    #[test]
    fn dotted_identifier_resolves_nested() {
        let ctx = json!({"config": {"port": 8080}});
        let result = transmute("port={{ config.port }}", &ctx).unwrap();
        assert_eq!(result.text, "port=8080");
    }

    #[test]
    fn missing_variable_without_default_fails() {
        let ctx = json!({});
        let err = transmute("{{ missing }}", &ctx).unwrap_err();
        assert!(matches!(err, RiteError::MissingGnosis { .. }));
    }

    #[test]
    fn default_filter_supplies_fallback() {
        let ctx = json!({});
        let result = transmute("{{ missing | default: \"fallback\" }}", &ctx).unwrap();
        assert_eq!(result.text, "fallback");
    }

    #[test]
    fn filter_chain_runs_left_to_right() {
        let ctx = json!({"name": "My Cool Project"});
        let result = transmute("{{ name | snake_case | upper }}", &ctx).unwrap();
        assert_eq!(result.text, "MY_COOL_PROJECT");
    }

    #[test]
    fn base64_filter_marks_binary() {
        let ctx = json!({"secret": "hunter2"});
        let result = transmute("{{ secret | base64 }}", &ctx).unwrap();
        assert!(result.is_binary);
    }

    #[test]
    fn discover_variables_static_scan() {
        let found = discover_variables("{{ a }} and {{ b.c | upper }} and {{ a }}");
        let expected: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn unknown_filter_fails() {
        let ctx = json!({"a": "x"});
        let err = transmute("{{ a | nope }}", &ctx).unwrap_err();
        assert!(matches!(err, RiteError::ParseHeresy { .. }));
    }

    #[test]
    fn unterminated_expression_fails() {
        let ctx = json!({});
        let err = transmute("{{ oops", &ctx).unwrap_err();
        assert!(matches!(err, RiteError::ParseHeresy { .. }));
    }
}
