//! Error types for Rite operations.
//!
//! This module defines the canonical error type used throughout the engine.
//! All subsystems return `Result<T, RiteError>` for fallible operations.

use std::io;
use thiserror::Error;

/// Canonical error type for all Rite operations.
///
/// Uses `thiserror` for automatic `Display`/`Error` impls. Most variants
/// correspond 1:1 to a fatal Heresy kind from the blueprint error taxonomy;
/// non-fatal heresies travel as [`crate::core::types::Heresy`] values instead
/// of through this type.
#[derive(Error, Debug)]
pub enum RiteError {
    /// I/O error (auto-converts from `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error (manifest, journal).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error (`.yaml`/`.yml` validator).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML deserialization error (`.toml` structured-merge Append).
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error (`.toml` structured-merge Append).
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Forbidden character, traversal attempt, or case collision in a path.
    #[error("path heresy at '{path}': {reason}")]
    PathHeresy { path: String, reason: String },

    /// A variable was referenced in a template expression but never defined
    /// and carries no `default` filter.
    #[error("missing gnosis: variable '{name}' is undefined (line {line}, col {col})")]
    MissingGnosis { name: String, line: usize, col: usize },

    /// A variable's value failed its declared type contract.
    #[error("schema violation: '{name}' does not satisfy contract '{contract}': {detail}")]
    SchemaViolation {
        name: String,
        contract: String,
        detail: String,
    },

    /// Blueprint syntax error.
    #[error("parse heresy at line {line}, col {col}: {detail}")]
    ParseHeresy {
        line: usize,
        col: usize,
        detail: String,
    },

    /// `@include` formed a cycle.
    #[error("import cycle detected: {cycle}")]
    ImportCycle { cycle: String },

    /// A mutation's `@hash:` anchor did not match the target file's current hash.
    #[error("anchor mismatch on '{path}': expected prefix '{expected}', found '{actual}'")]
    AnchorMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A staged file failed its registered validator.
    #[error("syntax heresy in '{path}' (line {line:?}): {detail}")]
    SyntaxHeresy {
        path: String,
        line: Option<usize>,
        detail: String,
    },

    /// The advisory lock could not be acquired before the configured timeout.
    #[error("concurrent rite: failed to acquire lock within {timeout_secs}s")]
    ConcurrentRite { timeout_secs: u64 },

    /// A Symphony action exited non-zero after exhausting its retry policy.
    #[error("shell strike fracture: '{command}' failed after {attempts} attempt(s): {detail}")]
    ShellStrikeFracture {
        command: String,
        attempts: u32,
        detail: String,
    },

    /// An internal handler raised an unexpected error; fatal and unrecoverable.
    #[error("meta heresy in {component}: {detail}")]
    MetaHeresy { component: String, detail: String },

    /// Resource not found (blueprint, trait, seed file).
    #[error("not found: {0}")]
    NotFound(String),

    /// Feature named by the interface but not implemented by this crate
    /// (e.g. a network-capable Sanctum for remote `@include`).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Generic validation failure not covered by a more specific variant.
    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_heresy_display() {
        let err = RiteError::PathHeresy {
            path: "../etc/passwd".to_string(),
            reason: "traversal".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "path heresy at '../etc/passwd': traversal"
        );
    }

    #[test]
    fn missing_gnosis_display() {
        let err = RiteError::MissingGnosis {
            name: "project_name".to_string(),
            line: 3,
            col: 5,
        };
        assert_eq!(
            format!("{}", err),
            "missing gnosis: variable 'project_name' is undefined (line 3, col 5)"
        );
    }

    #[test]
    fn not_implemented_display() {
        let err = RiteError::NotImplemented("remote @include".to_string());
        assert_eq!(format!("{}", err), "not implemented: remote @include");
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "nope");
        let err: RiteError = io_err.into();
        assert!(matches!(err, RiteError::Io(_)));
    }
}
