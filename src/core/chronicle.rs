//! Chronicle Scribe: federates new write results into the persisted
//! `scaffold.lock` manifest. Spec §3 (Manifest) and §4.7.
//!
//! Grounded on
//! `examples/original_source/src/velm/core/kernel/chronicle/manifest_federator.py`
//! (`ManifestFederator.federate`): annihilate-deleted, translocate-moved
//! (by content-hash equality), then inscribe-new movements, in that order.

use crate::core::error::RiteError;
use crate::core::integrity;
use crate::core::types::{ActionTaken, Heresy, WriteResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub timestamp: String,
    pub architect: Option<String>,
    pub git_commit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegritySeal {
    pub manifest_hash: String,
    pub merkle_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFileEntry {
    pub action: ActionTaken,
    pub sha256: String,
    pub bytes: u64,
    pub timestamp: String,
    pub dependencies: Vec<String>,
    pub blueprint_origin: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub provenance: Provenance,
    pub gnosis_delta: BTreeMap<String, String>,
    pub edicts_executed: Vec<String>,
    pub heresies: Vec<Heresy>,
    pub integrity: IntegritySeal,
    pub manifest: BTreeMap<PathBuf, ManifestFileEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Option<Self>, RiteError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Write atomically (temp file + rename) to `path`, archiving whatever
    /// previously lived there to `.scaffold/chronicles/<timestamp>.json`.
    pub fn write_atomic(&self, path: &Path, timestamp: &str) -> Result<(), RiteError> {
        if path.exists() {
            if let Some(project_root) = path.parent() {
                let archive_dir = project_root.join(".scaffold/chronicles");
                fs::create_dir_all(&archive_dir)?;
                let archive_path = archive_dir.join(format!("{timestamp}.json"));
                fs::copy(path, archive_path)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("lock.tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Federate `results` (this rite's WriteResults) and `deleted` (paths the
/// plan removed) into `old`, producing the manifest for the new
/// `scaffold.lock`. `timestamp`/`architect`/`git_commit` populate
/// provenance; the caller computes the merkle root separately once the
/// final path→sha256 set is known.
pub fn federate(
    old: Option<&Manifest>,
    results: &[WriteResult],
    deleted: &[PathBuf],
    timestamp: &str,
    architect: Option<String>,
    git_commit: Option<String>,
) -> Manifest {
    let mut manifest = old.cloned().unwrap_or_default();
    manifest.version += 1;
    manifest.provenance = Provenance { timestamp: timestamp.to_string(), architect, git_commit };

    // Movement I: annihilate deleted paths.
    for path in deleted {
        manifest.manifest.remove(path);
    }

    // Movement II: translocate renamed paths. A Translocated result names
    // its new path directly; the old path it replaces is whatever manifest
    // entry shares its content hash, so drop that stale entry here rather
    // than leaving both old and new paths pointing at the same content.
    for result in results.iter().filter(|r| matches!(r.action_taken, ActionTaken::Translocated)) {
        if let Some(new_hash) = &result.fingerprint {
            manifest
                .manifest
                .retain(|path, entry| !(entry.sha256 == *new_hash && path != &result.path));
        }
    }

    // Movement III: inscribe new/overwritten results, preserving prior
    // dependencies when the new result didn't recompute them.
    for result in results {
        if matches!(result.action_taken, ActionTaken::Deleted) {
            manifest.manifest.remove(&result.path);
            continue;
        }
        let dependencies = if result.dependencies.is_empty() {
            manifest
                .manifest
                .get(&result.path)
                .map(|e| e.dependencies.clone())
                .unwrap_or_default()
        } else {
            result.dependencies.clone()
        };
        manifest.manifest.insert(
            result.path.clone(),
            ManifestFileEntry {
                action: result.action_taken,
                sha256: result.fingerprint.clone().unwrap_or_default(),
                bytes: result.bytes_written,
                timestamp: timestamp.to_string(),
                dependencies,
                blueprint_origin: result.blueprint_origin.clone(),
            },
        );
    }

    let pairs: Vec<(String, String)> = manifest
        .manifest
        .iter()
        .map(|(path, entry)| (path.to_string_lossy().into_owned(), entry.sha256.clone()))
        .collect();
    manifest.integrity.merkle_root = Some(integrity::merkle_root(pairs));
    let canonical = serde_json::to_string(&manifest.manifest).unwrap_or_default();
    manifest.integrity.manifest_hash = integrity::hash_canonical_json(&canonical);

    manifest
}
