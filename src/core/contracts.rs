//! Variable type-contract validation. Spec §4.2/§6: a variable with a
//! declared contract is checked against its resolved value at transmutation
//! time; a mismatch raises `SchemaViolationHeresy`.
//!
//! Grounded on `examples/original_source/src/velm/jurisprudence_core/schema_adjudicator.py`
//! (`SchemaAdjudicator.parse_field_signature`/`_adjudicate_single_item`) — a
//! pragmatic Rust subset of its type system: str/int/float/bool/enum/path
//! contracts with their min/max/pattern/options/absolute/relative
//! constraints, `List[...]` per-element validation, and an `any` escape
//! hatch for unrecognized type names.

use crate::core::error::RiteError;
use std::collections::HashMap;

struct FieldSignature {
    type_name: String,
    is_list: bool,
    kwargs: HashMap<String, String>,
    options: Vec<String>,
}

fn parse_signature(raw: &str) -> FieldSignature {
    let raw = raw.trim();
    let (is_list, inner) = match raw.strip_prefix("List[").and_then(|r| r.strip_suffix(']')) {
        Some(rest) => (true, rest.trim()),
        None => (false, raw),
    };

    let (type_name, args) = match inner.find('(') {
        Some(pos) if inner.ends_with(')') => (inner[..pos].trim(), Some(&inner[pos + 1..inner.len() - 1])),
        _ => (inner, None),
    };

    let mut kwargs = HashMap::new();
    let mut options = Vec::new();
    if let Some(args) = args {
        for part in split_args(args) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((k, v)) => {
                    kwargs.insert(k.trim().to_string(), unquote(v.trim()));
                }
                None => options.push(unquote(part)),
            }
        }
    }

    FieldSignature { type_name: type_name.to_lowercase(), is_list, kwargs, options }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').trim_matches('\'').to_string()
}

/// Split a comma-separated constraint argument list, honoring quoted
/// strings so e.g. `enum("a, b", "c")` doesn't split inside the literal.
fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for ch in s.chars() {
        match ch {
            '"' | '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                args.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        args.push(current);
    }
    args
}

/// Validate `value` against a declared contract (`str(min=3)`,
/// `enum("a","b")`, `List[int]`, `int(min=0)`, ...). Returns
/// `RiteError::SchemaViolation` on mismatch; an unrecognized type name is
/// treated as `any` and always passes.
pub fn validate(name: &str, value: &str, contract: &str) -> Result<(), RiteError> {
    let signature = parse_signature(contract);
    if signature.is_list {
        for element in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            validate_scalar(name, element, &signature, contract)?;
        }
        return Ok(());
    }
    validate_scalar(name, value, &signature, contract)
}

fn violation(name: &str, contract: &str, detail: String) -> RiteError {
    RiteError::SchemaViolation { name: name.to_string(), contract: contract.to_string(), detail }
}

fn validate_scalar(name: &str, value: &str, sig: &FieldSignature, contract: &str) -> Result<(), RiteError> {
    match sig.type_name.as_str() {
        "str" | "string" | "text" => {
            if let Some(min) = sig.kwargs.get("min").and_then(|v| v.parse::<usize>().ok()) {
                if value.len() < min {
                    return Err(violation(name, contract, format!("length {} is below min {min}", value.len())));
                }
            }
            if let Some(max) = sig.kwargs.get("max").and_then(|v| v.parse::<usize>().ok()) {
                if value.len() > max {
                    return Err(violation(name, contract, format!("length {} exceeds max {max}", value.len())));
                }
            }
            if let Some(pattern) = sig.kwargs.get("pattern") {
                let regex = regex::Regex::new(pattern)
                    .map_err(|e| violation(name, contract, format!("invalid pattern '{pattern}': {e}")))?;
                if !regex.is_match(value) {
                    return Err(violation(name, contract, format!("value does not match pattern '{pattern}'")));
                }
            }
            Ok(())
        }
        "int" | "integer" => {
            let parsed: i64 =
                value.parse().map_err(|_| violation(name, contract, format!("'{value}' is not an integer")))?;
            if let Some(min) = sig.kwargs.get("min").and_then(|v| v.parse::<i64>().ok()) {
                if parsed < min {
                    return Err(violation(name, contract, format!("{parsed} is below min {min}")));
                }
            }
            if let Some(max) = sig.kwargs.get("max").and_then(|v| v.parse::<i64>().ok()) {
                if parsed > max {
                    return Err(violation(name, contract, format!("{parsed} exceeds max {max}")));
                }
            }
            Ok(())
        }
        "float" | "number" => {
            let parsed: f64 =
                value.parse().map_err(|_| violation(name, contract, format!("'{value}' is not a number")))?;
            if let Some(min) = sig.kwargs.get("min").and_then(|v| v.parse::<f64>().ok()) {
                if parsed < min {
                    return Err(violation(name, contract, format!("{parsed} is below min {min}")));
                }
            }
            if let Some(max) = sig.kwargs.get("max").and_then(|v| v.parse::<f64>().ok()) {
                if parsed > max {
                    return Err(violation(name, contract, format!("{parsed} exceeds max {max}")));
                }
            }
            Ok(())
        }
        "bool" | "boolean" => match value {
            "true" | "false" | "1" | "0" | "yes" | "no" => Ok(()),
            _ => Err(violation(name, contract, format!("'{value}' is not a boolean"))),
        },
        "enum" => {
            if sig.options.iter().any(|o| o == value) {
                Ok(())
            } else {
                Err(violation(name, contract, format!("'{value}' is not one of {:?}", sig.options)))
            }
        }
        "path" => {
            let is_absolute = std::path::Path::new(value).is_absolute();
            if sig.kwargs.get("absolute").map(|v| v == "true").unwrap_or(false) && !is_absolute {
                return Err(violation(name, contract, format!("'{value}' must be an absolute path")));
            }
            if sig.kwargs.get("relative").map(|v| v == "true").unwrap_or(false) && is_absolute {
                return Err(violation(name, contract, format!("'{value}' must be a relative path")));
            }
            Ok(())
        }
        // Unrecognized type names (including the explicit `any` escape)
        // are not adjudicated — the contract is descriptive, not binding.
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_min_length_violation() {
        let err = validate("project_name", "ab", "str(min=3)").unwrap_err();
        assert!(matches!(err, RiteError::SchemaViolation { .. }));
    }

    #[test]
    fn str_within_bounds_passes() {
        assert!(validate("project_name", "abcd", "str(min=3, max=10)").is_ok());
    }

    #[test]
    fn str_pattern_violation() {
        let err = validate("slug", "Not Valid", r#"str(pattern="^[a-z0-9-]+$")"#).unwrap_err();
        assert!(matches!(err, RiteError::SchemaViolation { .. }));
    }

    #[test]
    fn int_min_violation() {
        let err = validate("port", "-1", "int(min=0)").unwrap_err();
        assert!(matches!(err, RiteError::SchemaViolation { .. }));
    }

    #[test]
    fn int_non_numeric_violation() {
        assert!(validate("port", "not-a-number", "int(min=0)").is_err());
    }

    #[test]
    fn enum_rejects_unknown_option() {
        let err = validate("license", "WTFPL", r#"enum("MIT", "Apache-2.0")"#).unwrap_err();
        assert!(matches!(err, RiteError::SchemaViolation { .. }));
    }

    #[test]
    fn enum_accepts_known_option() {
        assert!(validate("license", "MIT", r#"enum("MIT", "Apache-2.0")"#).is_ok());
    }

    #[test]
    fn list_int_validates_each_element() {
        assert!(validate("ports", "80, 443, 8080", "List[int]").is_ok());
        assert!(validate("ports", "80, nope", "List[int]").is_err());
    }

    #[test]
    fn path_absolute_constraint() {
        assert!(validate("root", "/srv/app", "path(absolute=true)").is_ok());
        assert!(validate("root", "relative/path", "path(absolute=true)").is_err());
    }

    #[test]
    fn unknown_type_name_is_not_adjudicated() {
        assert!(validate("anything", "whatever", "any").is_ok());
        assert!(validate("anything", "whatever", "unknown_type").is_ok());
    }
}
