//! Append-only log of staging operations with their inverses. Spec §3 and
//! §4.6.
//!
//! The JSON-lines journal persistence pattern is grounded on the
//! applied-migration journal in
//! `examples/DecapodLabs-decapod/src/core/migration.rs`
//! (`AppliedMigrationLedger`); inverse semantics follow
//! `examples/original_source/src/velm/artisans/undo/reverser.py`'s
//! `LedgerOperation` taxonomy.

use crate::core::error::RiteError;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    WriteFile,
    DeleteFile,
    MkDir,
    RmDir,
    Chmod,
    Symlink,
    ExecShell,
}

/// One recorded operation against the staging tree (or, post-promote, the
/// project root) together with what's needed to reverse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tx_id: String,
    pub sequence: u64,
    pub op: LedgerOp,
    pub path: PathBuf,
    /// Content before this operation, or `None` if the path didn't exist.
    pub snapshot_content: Option<Vec<u8>>,
    pub prior_mode: Option<u32>,
    pub new_mode: Option<u32>,
    /// Whether the originating MkDir/RmDir was invoked with `recursive`.
    pub recursive: bool,
    /// The `%% on-undo` shell block recorded at parse time, for ExecShell.
    pub on_undo: Option<String>,
    pub reversible: bool,
}

impl LedgerEntry {
    pub fn write_file(tx_id: &str, sequence: u64, path: PathBuf, prior: Option<Vec<u8>>) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            sequence,
            op: LedgerOp::WriteFile,
            path,
            snapshot_content: prior,
            prior_mode: None,
            new_mode: None,
            recursive: false,
            on_undo: None,
            reversible: true,
        }
    }

    pub fn mkdir(tx_id: &str, sequence: u64, path: PathBuf, recursive: bool) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            sequence,
            op: LedgerOp::MkDir,
            path,
            snapshot_content: None,
            prior_mode: None,
            new_mode: None,
            recursive,
            on_undo: None,
            reversible: true,
        }
    }

    pub fn chmod(tx_id: &str, sequence: u64, path: PathBuf, prior_mode: u32, new_mode: u32) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            sequence,
            op: LedgerOp::Chmod,
            path,
            snapshot_content: None,
            prior_mode: Some(prior_mode),
            new_mode: Some(new_mode),
            recursive: false,
            on_undo: None,
            reversible: true,
        }
    }

    /// `prior_target` is the path bytes of whatever symlink previously sat
    /// at `path`, or `None` if nothing was there (the common case, and the
    /// only one the Reverser can restore: if the prior entry was a regular
    /// file rather than a symlink, reversal deletes rather than restores it).
    pub fn symlink(tx_id: &str, sequence: u64, path: PathBuf, prior_target: Option<Vec<u8>>) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            sequence,
            op: LedgerOp::Symlink,
            path,
            snapshot_content: prior_target,
            prior_mode: None,
            new_mode: None,
            recursive: false,
            on_undo: None,
            reversible: true,
        }
    }

    pub fn exec_shell(tx_id: &str, sequence: u64, command: &str, on_undo: Option<String>) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            sequence,
            op: LedgerOp::ExecShell,
            path: PathBuf::from(command),
            snapshot_content: None,
            prior_mode: None,
            new_mode: None,
            recursive: false,
            reversible: on_undo.is_some(),
            on_undo,
        }
    }
}

/// The in-memory operation log for one transaction.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    next_sequence: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn record(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn snapshot(&self, tx_id: &str) -> Vec<&LedgerEntry> {
        self.entries.iter().filter(|e| e.tx_id == tx_id).collect()
    }

    pub fn all(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every entry for `tx_id` to `path` as JSON-lines, one entry
    /// per line (`.scaffold/journal.jsonl`).
    pub fn persist(&self, tx_id: &str, path: &Path) -> Result<(), RiteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for entry in self.snapshot(tx_id) {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_and_snapshots_by_tx_id() {
        let mut ledger = Ledger::new();
        let seq0 = ledger.next_sequence();
        ledger.record(LedgerEntry::write_file("tx1", seq0, PathBuf::from("a.txt"), None));
        let seq1 = ledger.next_sequence();
        ledger.record(LedgerEntry::write_file("tx2", seq1, PathBuf::from("b.txt"), None));

        assert_eq!(ledger.snapshot("tx1").len(), 1);
        assert_eq!(ledger.snapshot("tx2").len(), 1);
        assert_eq!(ledger.all().len(), 2);
    }

    #[test]
    fn persists_as_json_lines() {
        let dir = tempdir().unwrap();
        let journal = dir.path().join(".scaffold/journal.jsonl");
        let mut ledger = Ledger::new();
        let seq = ledger.next_sequence();
        ledger.record(LedgerEntry::write_file("tx1", seq, PathBuf::from("a.txt"), None));
        ledger.persist("tx1", &journal).unwrap();

        let content = std::fs::read_to_string(&journal).unwrap();
        assert_eq!(content.lines().count(), 1);
        let parsed: LedgerEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.path, PathBuf::from("a.txt"));
    }

    #[test]
    fn exec_shell_without_undo_is_not_reversible() {
        let entry = LedgerEntry::exec_shell("tx1", 0, "curl http://x", None);
        assert!(!entry.reversible);
    }
}
