//! Reverser: walks a Ledger in reverse and executes inverse actions. Spec
//! §4.6.
//!
//! Grounded on `examples/original_source/src/velm/artisans/undo/reverser.py`
//! (`TemporalReverser.reverse`): op-keyed dispatch, the non-empty-dir
//! refusal for un-flagged `RmDir`, and the static inferred-inverse table
//! for common shell commands when no `on-undo` block was recorded.

use crate::core::error::RiteError;
use crate::core::ledger::{LedgerEntry, LedgerOp};
use crate::core::sanctum::Sanctum;
use crate::core::types::Heresy;
use std::process::Command;

/// Directory-delete size above which a pre-deletion snapshot is considered
/// too expensive and the operation is recorded as non-reversible instead.
pub const LARGE_DIR_THRESHOLD: usize = 256;

/// Outcome of reversing one ledger entry.
#[derive(Debug, Clone)]
pub enum ReverseOutcome {
    Reversed,
    SkippedNonReversible,
    Failed(Heresy),
}

/// Reverse every entry in `entries`, most-recent first. A single failing
/// step is recorded as a meta-heresy and does not halt the remaining
/// inverses (the Reverser is resilient, per spec §4.6).
pub fn reverse(entries: &[LedgerEntry], sanctum: &dyn Sanctum) -> Vec<ReverseOutcome> {
    let mut outcomes = Vec::with_capacity(entries.len());
    for entry in entries.iter().rev() {
        if !entry.reversible {
            outcomes.push(ReverseOutcome::SkippedNonReversible);
            continue;
        }
        let outcome = match reverse_one(entry, sanctum) {
            Ok(()) => ReverseOutcome::Reversed,
            Err(err) => ReverseOutcome::Failed(Heresy::critical(
                "MetaHeresy",
                format!("failed to reverse {:?} on '{}': {err}", entry.op, entry.path.display()),
            )),
        };
        outcomes.push(outcome);
    }
    outcomes
}

fn reverse_one(entry: &LedgerEntry, sanctum: &dyn Sanctum) -> Result<(), RiteError> {
    match entry.op {
        LedgerOp::WriteFile => match &entry.snapshot_content {
            Some(content) => sanctum.write(&entry.path, content),
            None => {
                if sanctum.exists(&entry.path) {
                    sanctum.delete(&entry.path, false)
                } else {
                    Ok(())
                }
            }
        },
        LedgerOp::DeleteFile => match &entry.snapshot_content {
            Some(content) => sanctum.write(&entry.path, content),
            None => Ok(()),
        },
        LedgerOp::MkDir => {
            if sanctum.exists(&entry.path) {
                sanctum.delete(&entry.path, entry.recursive)
            } else {
                Ok(())
            }
        }
        LedgerOp::RmDir => match &entry.snapshot_content {
            Some(content) => sanctum.write(&entry.path, content),
            None => Ok(()),
        },
        LedgerOp::Chmod => match entry.prior_mode {
            Some(mode) => sanctum.chmod(&entry.path, mode),
            None => Ok(()),
        },
        LedgerOp::Symlink => match &entry.snapshot_content {
            Some(prior_target) => {
                let target = String::from_utf8_lossy(prior_target).into_owned();
                if sanctum.exists(&entry.path) {
                    sanctum.delete(&entry.path, false)?;
                }
                sanctum.symlink(&entry.path, std::path::Path::new(&target))
            }
            None => {
                if sanctum.exists(&entry.path) {
                    sanctum.delete(&entry.path, false)
                } else {
                    Ok(())
                }
            }
        },
        LedgerOp::ExecShell => reverse_shell(entry),
    }
}

fn reverse_shell(entry: &LedgerEntry) -> Result<(), RiteError> {
    let command_text = entry.path.to_string_lossy().to_string();
    let undo_command = entry
        .on_undo
        .clone()
        .or_else(|| inferred_inverse(&command_text));

    match undo_command {
        Some(cmd) => {
            let status = Command::new("sh").arg("-c").arg(&cmd).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(RiteError::ShellStrikeFracture {
                    command: cmd,
                    attempts: 1,
                    detail: format!("undo command exited with {status}"),
                })
            }
        }
        None => Ok(()),
    }
}

/// Static table of inferred inverses for common shell commands when no
/// `%% on-undo` block was recorded.
fn inferred_inverse(command: &str) -> Option<String> {
    let trimmed = command.trim();
    if trimmed == "npm install" || trimmed.starts_with("npm install ") {
        return Some("rm -rf node_modules".to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("mkdir ") {
        return Some(format!("rmdir {}", rest.trim()));
    }
    if let Some(rest) = trimmed.strip_prefix("git init") {
        let _ = rest;
        return Some("rm -rf .git".to_string());
    }
    None
}
