//! The Prompter interface: resolves a missing variable by asking, per
//! spec §6.3. Non-interactive mode fails `ask` unless a default exists.

use crate::core::error::RiteError;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PleaKind {
    Text,
    Number,
    Bool,
    Choice,
    Secret,
}

/// A single question the core needs answered before it can proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plea {
    pub name: String,
    pub kind: PleaKind,
    pub message: String,
    pub default: Option<String>,
    pub choices: Option<Vec<String>>,
}

pub trait Prompter: Send + Sync {
    fn ask(&self, plea: &Plea) -> Result<String, RiteError>;
}

/// The default Prompter for CI/scripted rites: answers from `default` when
/// present, otherwise fails rather than blocking on stdin.
#[derive(Debug, Default)]
pub struct NonInteractivePrompter;

impl NonInteractivePrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for NonInteractivePrompter {
    fn ask(&self, plea: &Plea) -> Result<String, RiteError> {
        plea.default.clone().ok_or_else(|| {
            RiteError::MissingGnosis {
                name: plea.name.clone(),
                line: 0,
                col: 0,
            }
        })
    }
}

/// Reads answers from stdin, echoing the question to stdout. Empty input
/// falls back to `default` when present.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl StdinPrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for StdinPrompter {
    fn ask(&self, plea: &Plea) -> Result<String, RiteError> {
        let prompt = match (&plea.default, &plea.choices) {
            (Some(default), Some(choices)) => {
                format!("{} [{}] ({}): ", plea.message, choices.join("/"), default)
            }
            (Some(default), None) => format!("{} ({}): ", plea.message, default),
            (None, Some(choices)) => format!("{} [{}]: ", plea.message, choices.join("/")),
            (None, None) => format!("{}: ", plea.message),
        };
        print!("{prompt}");
        io::stdout().flush().ok();

        let mut input = String::new();
        io::stdin()
            .read_line(&mut input)
            .map_err(RiteError::Io)?;
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return plea.default.clone().ok_or_else(|| RiteError::MissingGnosis {
                name: plea.name.clone(),
                line: 0,
                col: 0,
            });
        }
        if let Some(choices) = &plea.choices {
            if !choices.iter().any(|c| c == trimmed) {
                return Err(RiteError::Validation(format!(
                    "'{trimmed}' is not one of: {}",
                    choices.join(", ")
                )));
            }
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_returns_default() {
        let prompter = NonInteractivePrompter::new();
        let plea = Plea {
            name: "project_name".to_string(),
            kind: PleaKind::Text,
            message: "Project name?".to_string(),
            default: Some("widget".to_string()),
            choices: None,
        };
        assert_eq!(prompter.ask(&plea).unwrap(), "widget");
    }

    #[test]
    fn non_interactive_fails_without_default() {
        let prompter = NonInteractivePrompter::new();
        let plea = Plea {
            name: "project_name".to_string(),
            kind: PleaKind::Text,
            message: "Project name?".to_string(),
            default: None,
            choices: None,
        };
        assert!(prompter.ask(&plea).is_err());
    }
}
