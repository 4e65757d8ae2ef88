//! Symphony Runtime: executes the `Edict` stream produced by the parser's
//! `%% post-run:`/`%% on-heresy:`/`%% on-undo:` blocks. Spec §3 (Symphony)
//! and §4.5 step 5 ("Commit").
//!
//! Grounded on the retry/backoff/`allow_fail` sequencing of
//! `examples/original_source/src/velm/core/maestro/handlers/shell.py`
//! (`ShellHandler.conduct`), and the `on-heresy` causal binding of
//! `examples/original_source/src/velm/parser_core/parser/parser_scribes/scaffold_scribes/on_heresy_scribe.py`,
//! adapted onto this crate's `Ledger` (captured commands are recorded as
//! `ExecShell` entries so the Reverser can undo them later).

use crate::core::alchemist;
use crate::core::error::RiteError;
use crate::core::ledger::{Ledger, LedgerEntry};
use crate::core::logger::Logger;
use crate::core::parser::symphony::{Edict, EdictKind, RetryBackoff};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// Accumulated captured-variable state across one Symphony run.
#[derive(Debug, Default)]
pub struct SymphonyState {
    pub captures: HashMap<String, String>,
    pub exit_codes: HashMap<String, i32>,
}

/// Run every edict of `kind` against `project_root`, recording reversible
/// shell invocations into `ledger`. Returns `Ok(())` if every non-`allow_fail`
/// action and vow succeeded.
pub fn perform(
    edicts: &[Edict],
    kind: EdictKind,
    project_root: &Path,
    context: &JsonValue,
    ledger: &mut Ledger,
    tx_id: &str,
    logger: &dyn Logger,
) -> Result<SymphonyState, RiteError> {
    let mut state = SymphonyState::default();
    for edict in edicts.iter().filter(|e| edict_kind(e) == kind) {
        match edict {
            Edict::Action { command, capture_var, retry, allow_fail, .. } => {
                let command = alchemist::transmute(command, context)?.text;
                let command = &command;
                match run_with_retry(command, project_root, retry) {
                    Ok(output) => {
                        if let Some(name) = capture_var {
                            state.captures.insert(name.clone(), output.stdout.clone());
                        }
                        state.exit_codes.insert(command.clone(), output.code);
                        ledger.record(LedgerEntry::exec_shell(tx_id, ledger.next_sequence(), command, None));
                        logger.verbose(&format!("post-run: '{command}' exited {}", output.code));
                    }
                    Err(err) => {
                        if *allow_fail {
                            logger.warn(&format!("post-run '{command}' failed (allowed): {err}"));
                            continue;
                        }
                        return Err(err);
                    }
                }
            }
            Edict::Vow { assertion, args, .. } => {
                check_vow(assertion, args, &state)?;
            }
            Edict::State { key, value, .. } => {
                apply_state(key, value, &mut state, logger)?;
            }
        }
    }
    Ok(state)
}

fn edict_kind(edict: &Edict) -> EdictKind {
    match edict {
        Edict::Action { kind, .. } => *kind,
        Edict::Vow { kind, .. } => *kind,
        Edict::State { kind, .. } => *kind,
    }
}

struct ActionOutput {
    code: i32,
    stdout: String,
}

fn run_with_retry(command: &str, cwd: &Path, retry: &Option<crate::core::parser::symphony::RetryPolicy>) -> Result<ActionOutput, RiteError> {
    let attempts = retry.as_ref().map(|r| r.attempts.max(1)).unwrap_or(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match run_once(command, cwd) {
            Ok(output) if output.code == 0 => return Ok(output),
            Ok(output) => {
                last_err = Some(RiteError::ShellStrikeFracture {
                    command: command.to_string(),
                    attempts: attempt + 1,
                    detail: format!("exited with code {}", output.code),
                });
            }
            Err(err) => last_err = Some(err),
        }
        if let Some(policy) = retry {
            if attempt + 1 < attempts {
                let delay = match policy.backoff {
                    RetryBackoff::Linear => policy.interval_secs,
                    RetryBackoff::Exponential => policy.interval_secs.saturating_mul(1 << attempt),
                };
                thread::sleep(Duration::from_secs(delay));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| RiteError::ShellStrikeFracture {
        command: command.to_string(),
        attempts,
        detail: "unknown failure".to_string(),
    }))
}

fn run_once(command: &str, cwd: &Path) -> Result<ActionOutput, RiteError> {
    let output = Command::new("sh").arg("-c").arg(command).current_dir(cwd).output()?;
    Ok(ActionOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
    })
}

fn check_vow(assertion: &str, args: &[String], state: &SymphonyState) -> Result<(), RiteError> {
    let ok = match assertion {
        "stdout_contains" => {
            let var = args.first().map(String::as_str).unwrap_or("");
            let needle = args.get(1).map(String::as_str).unwrap_or("");
            state.captures.get(var).map(|v| v.contains(needle)).unwrap_or(false)
        }
        "exit_code" => {
            let command = args.first().map(String::as_str).unwrap_or("");
            let expected: i32 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            state.exit_codes.get(command).map(|c| *c == expected).unwrap_or(false)
        }
        "file_exists" => args.first().map(|p| Path::new(p).exists()).unwrap_or(false),
        other => {
            return Err(RiteError::ParseHeresy {
                line: 0,
                col: 0,
                detail: format!("unknown vow assertion '{other}'"),
            })
        }
    };
    if !ok {
        return Err(RiteError::Validation(format!("vow '{assertion}' failed with args {args:?}")));
    }
    Ok(())
}

fn apply_state(key: &str, value: &str, state: &mut SymphonyState, logger: &dyn Logger) -> Result<(), RiteError> {
    match key {
        "sleep" => {
            let secs: u64 = value.parse().map_err(|_| RiteError::Validation(format!("invalid sleep duration '{value}'")))?;
            thread::sleep(Duration::from_secs(secs));
        }
        "set" | "let" | "var" => {
            if let Some((k, v)) = value.split_once('=') {
                state.captures.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        "proclaim" => logger.info(value),
        "fail" => return Err(RiteError::Validation(value.to_string())),
        _ => logger.verbose(&format!("state key '{key}' = '{value}' (no-op handler)")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::SilentLogger;
    use tempfile::tempdir;

    fn action(command: &str) -> Edict {
        Edict::Action {
            kind: EdictKind::PostRun,
            command: command.to_string(),
            capture_var: None,
            strategy: None,
            retry: None,
            allow_fail: false,
        }
    }

    #[test]
    fn runs_post_run_action_successfully() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::new();
        let edicts = vec![action("echo hi")];
        let result = perform(&edicts, EdictKind::PostRun, dir.path(), &serde_json::json!({}), &mut ledger, "tx1", &SilentLogger);
        assert!(result.is_ok());
        assert_eq!(ledger.all().len(), 1);
    }

    #[test]
    fn allow_fail_action_does_not_abort() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::new();
        let edicts = vec![Edict::Action {
            kind: EdictKind::PostRun,
            command: "exit 1".to_string(),
            capture_var: None,
            strategy: None,
            retry: None,
            allow_fail: true,
        }];
        let result = perform(&edicts, EdictKind::PostRun, dir.path(), &serde_json::json!({}), &mut ledger, "tx1", &SilentLogger);
        assert!(result.is_ok());
    }

    #[test]
    fn failing_action_without_allow_fail_errors() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::new();
        let edicts = vec![action("exit 1")];
        let result = perform(&edicts, EdictKind::PostRun, dir.path(), &serde_json::json!({}), &mut ledger, "tx1", &SilentLogger);
        assert!(result.is_err());
    }

    #[test]
    fn vow_stdout_contains_checks_capture() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::new();
        let edicts = vec![
            Edict::Action {
                kind: EdictKind::PostRun,
                command: "echo hello-world".to_string(),
                capture_var: Some("out".to_string()),
                strategy: None,
                retry: None,
                allow_fail: false,
            },
            Edict::Vow {
                kind: EdictKind::PostRun,
                assertion: "stdout_contains".to_string(),
                args: vec!["out".to_string(), "hello".to_string()],
            },
        ];
        let result = perform(&edicts, EdictKind::PostRun, dir.path(), &serde_json::json!({}), &mut ledger, "tx1", &SilentLogger);
        assert!(result.is_ok());
    }

    #[test]
    fn only_edicts_matching_kind_run() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::new();
        let edicts = vec![Edict::Action {
            kind: EdictKind::OnHeresy,
            command: "echo should-not-run".to_string(),
            capture_var: None,
            strategy: None,
            retry: None,
            allow_fail: false,
        }];
        perform(&edicts, EdictKind::PostRun, dir.path(), &serde_json::json!({}), &mut ledger, "tx1", &SilentLogger).unwrap();
        assert!(ledger.all().is_empty());
    }
}
