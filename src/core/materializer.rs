//! Transactional Materializer: Begin → Stage → Validate → Promote → Commit.
//! Spec §4.5. The only module that turns an `OrderedPlan` into real (or,
//! in Prophecy mode, merely described) filesystem change.
//!
//! Grounded on the five-phase commit protocol in
//! `examples/original_source/src/velm/artisans/genesis/materializer.py`
//! (`TransactionalMaterializer.perform_rite`), adapted onto this crate's
//! `Sanctum`/`Ledger`/`StagingTree` primitives; the staging-then-rename
//! promote step follows the atomic-write pattern in
//! `examples/DecapodLabs-decapod/src/core/state_commit.rs`.

use crate::core::alchemist;
use crate::core::chronicle::{self, Manifest};
use crate::core::enrichments;
use crate::core::error::RiteError;
use crate::core::integrity;
use crate::core::ledger::{Ledger, LedgerEntry};
use crate::core::logger::Logger;
use crate::core::reverser::{self, ReverseOutcome};
use crate::core::sanctum::{LocalSanctum, Sanctum};
use crate::core::sentinel::PathSentinel;
use crate::core::parser::symphony::EdictKind;
use crate::core::staging::{AdvisoryLock, StagingTree};
use crate::core::symphony_runtime;
use crate::core::types::{ActionTaken, Heresy, ItemKind, MutationOp, OrderedPlan, WriteResult};
use crate::core::validators;
use base64::Engine;
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Extensions the Materializer treats as opaque binary when copying a
/// `seed:` file rather than running it through the Alchemist.
const BINARY_SEED_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "gif", "ico", "woff", "woff2", "ttf", "otf", "pdf", "zip", "gz"];

/// Everything the Commit phase needs to know about one completed rite.
#[derive(Debug, Clone)]
pub struct RiteOutcome {
    pub results: Vec<WriteResult>,
    pub deleted: Vec<PathBuf>,
    pub heresies: Vec<Heresy>,
    pub warnings: Vec<String>,
    pub manifest: Manifest,
}

/// One line of a dry-run Prophecy: what *would* happen to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProphecyStatus {
    Created,
    Modified,
    Deleted,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct ProphecyEntry {
    pub path: PathBuf,
    pub status: ProphecyStatus,
    pub diff: Option<String>,
}

/// What Stage produced for one blueprint item, before Promote has touched
/// the real project root.
struct Staged {
    relative: PathBuf,
    is_dir: bool,
    is_delete: bool,
    is_symlink: bool,
    symlink_target: Option<PathBuf>,
    mode: Option<u32>,
    action: ActionTaken,
    bytes: Option<Vec<u8>>,
    fingerprint: Option<String>,
    blueprint_origin: PathBuf,
}

/// Run a full transactional rite: Begin, Stage, Validate, Promote, Commit.
/// On any failure after Stage, already-promoted changes for this
/// transaction are rolled back via the Reverser and the lock is released
/// before returning the error.
#[allow(clippy::too_many_arguments)]
pub fn materialize(
    plan: &OrderedPlan,
    project_root: &Path,
    tx_id: &str,
    timestamp: &str,
    architect: Option<String>,
    git_commit: Option<String>,
    context: &JsonValue,
    logger: &dyn Logger,
) -> Result<RiteOutcome, RiteError> {
    let sanctum = LocalSanctum::new();
    if let Some(ancestor) = enrichments::detect_nested_root(project_root) {
        logger.warn(&format!(
            "'{}' is nested inside an existing rite-managed project at '{}'",
            project_root.display(),
            ancestor.display()
        ));
    }

    let _lock = AdvisoryLock::acquire(project_root, LOCK_TIMEOUT)?;
    let staging = StagingTree::begin(project_root, tx_id)?;
    let mut ledger = Ledger::new();
    let mut sentinel = PathSentinel::new();
    sentinel.seed_existing(project_root)?;

    let stage_result = stage_items(plan, project_root, &staging, &mut ledger, &mut sentinel);
    let mut staged = match stage_result {
        Ok(s) => s,
        Err(err) => {
            staging.discard().ok();
            return Err(err);
        }
    };

    let staged_relative_paths: Vec<PathBuf> =
        staged.iter().filter(|i| !i.is_dir && !i.is_delete && !i.is_symlink).map(|i| i.relative.clone()).collect();
    if let Err(err) = stage_gitignore_veil(&staging, &staged_relative_paths, &mut staged, &mut ledger) {
        staging.discard().ok();
        return Err(err);
    }

    let mut heresies = Vec::new();
    let mut warnings = Vec::new();
    if let Err(err) = validate_staging(&staging, &staged) {
        staging.discard().ok();
        return Err(err);
    }

    logger.info(&format!("staged {} item(s) for '{}'", staged.len(), tx_id));

    let promote_result = promote(&staging, &staged, &sanctum, &mut ledger);
    if let Err(err) = promote_result {
        logger.error(&format!("promote failed, rolling back: {err}"));
        let outcomes = reverser::reverse(ledger.snapshot(tx_id).into_iter().cloned().collect::<Vec<_>>().as_slice(), &sanctum);
        for outcome in outcomes {
            if let ReverseOutcome::Failed(h) = outcome {
                heresies.push(h);
            }
        }
        run_on_heresy(plan, project_root, context, &mut ledger, tx_id, logger);
        staging.discard().ok();
        return Err(err);
    }

    if let Err(err) = symphony_runtime::perform(&plan.edicts, EdictKind::PostRun, project_root, context, &mut ledger, tx_id, logger) {
        logger.error(&format!("post-run edict failed, rolling back: {err}"));
        let outcomes = reverser::reverse(ledger.snapshot(tx_id).into_iter().cloned().collect::<Vec<_>>().as_slice(), &sanctum);
        for outcome in outcomes {
            if let ReverseOutcome::Failed(h) = outcome {
                heresies.push(h);
            }
        }
        run_on_heresy(plan, project_root, context, &mut ledger, tx_id, logger);
        staging.discard().ok();
        return Err(err);
    }

    let journal_path = project_root.join(".scaffold/journal.jsonl");
    ledger.persist(tx_id, &journal_path)?;

    let mut results = Vec::new();
    let mut deleted = Vec::new();
    let mut written_paths = Vec::new();
    for item in &staged {
        if item.is_delete {
            deleted.push(item.relative.clone());
            continue;
        }
        if item.is_dir || item.is_symlink {
            continue;
        }
        written_paths.push(item.relative.clone());
        if let Some(bytes) = &item.bytes {
            if let Ok(text) = std::str::from_utf8(bytes) {
                warnings.extend(enrichments::scan_for_secrets(&item.relative, text));
            }
        }
        results.push(WriteResult {
            path: item.relative.clone(),
            success: true,
            action_taken: item.action,
            bytes_written: item.bytes.as_ref().map(|b| b.len() as u64).unwrap_or(0),
            fingerprint: item.fingerprint.clone(),
            dependencies: Vec::new(),
            blueprint_origin: item.blueprint_origin.clone(),
        });
    }

    match enrichments::prune_empty_directories(project_root) {
        Ok(pruned) => {
            for dir in pruned {
                logger.verbose(&format!("pruned empty directory '{}'", dir.display()));
            }
        }
        Err(err) => warnings.push(format!("could not prune empty directories: {err}")),
    }

    let manifest_path = project_root.join("scaffold.lock");
    let old_manifest = Manifest::load(&manifest_path)?;
    let manifest = chronicle::federate(old_manifest.as_ref(), &results, &deleted, timestamp, architect, git_commit);
    manifest.write_atomic(&manifest_path, timestamp)?;

    staging.discard().ok();
    logger.info(&format!("rite '{tx_id}' committed: {} file(s)", results.len()));

    Ok(RiteOutcome { results, deleted, heresies, warnings, manifest })
}

/// Best-effort: run the plan's `%% on-heresy:` edicts after a failed
/// Promote or post-run. Failures here are logged, never propagated — the
/// original error is what the caller returns.
fn run_on_heresy(plan: &OrderedPlan, project_root: &Path, context: &JsonValue, ledger: &mut Ledger, tx_id: &str, logger: &dyn Logger) {
    if let Err(err) = symphony_runtime::perform(&plan.edicts, EdictKind::OnHeresy, project_root, context, ledger, tx_id, logger) {
        logger.warn(&format!("on-heresy edict also failed: {err}"));
    }
}

/// Stage+Validate only, then diff the staged tree against the real project
/// root instead of promoting. Staging is discarded afterward regardless of
/// outcome — Prophecy never mutates the project root.
pub fn prophesy(plan: &OrderedPlan, project_root: &Path, tx_id: &str) -> Result<Vec<ProphecyEntry>, RiteError> {
    let staging = StagingTree::begin(project_root, tx_id)?;
    let mut ledger = Ledger::new();
    let mut sentinel = PathSentinel::new();
    sentinel.seed_existing(project_root)?;

    let staged = match stage_items(plan, project_root, &staging, &mut ledger, &mut sentinel) {
        Ok(s) => s,
        Err(err) => {
            staging.discard().ok();
            return Err(err);
        }
    };
    if let Err(err) = validate_staging(&staging, &staged) {
        staging.discard().ok();
        return Err(err);
    }

    let mut entries = Vec::new();
    for item in &staged {
        if item.is_dir {
            continue;
        }
        if item.is_delete {
            entries.push(ProphecyEntry { path: item.relative.clone(), status: ProphecyStatus::Deleted, diff: None });
            continue;
        }
        let project_path = staging.project_path(&item.relative);
        let new_bytes = item.bytes.clone().unwrap_or_default();
        if !project_path.exists() {
            entries.push(ProphecyEntry { path: item.relative.clone(), status: ProphecyStatus::Created, diff: None });
            continue;
        }
        let old_bytes = std::fs::read(&project_path).unwrap_or_default();
        if old_bytes == new_bytes {
            entries.push(ProphecyEntry { path: item.relative.clone(), status: ProphecyStatus::Unchanged, diff: None });
            continue;
        }
        let diff = match (std::str::from_utf8(&old_bytes), std::str::from_utf8(&new_bytes)) {
            (Ok(old_text), Ok(new_text)) => Some(render_diff(old_text, new_text)),
            _ => Some(format!("binary content changed ({} -> {} bytes)", old_bytes.len(), new_bytes.len())),
        };
        entries.push(ProphecyEntry { path: item.relative.clone(), status: ProphecyStatus::Modified, diff });
    }

    staging.discard().ok();
    Ok(entries)
}

fn render_diff(old_text: &str, new_text: &str) -> String {
    let diff = TextDiff::from_lines(old_text, new_text);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let marker = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        out.push(marker);
        out.push_str(&change.to_string());
    }
    out
}

/// A Form item whose path has cleared the Sentinel and anchor-hash checks,
/// awaiting content resolution and mutation.
struct PendingMutation<'a> {
    item: &'a crate::core::types::BlueprintItem,
    relative: PathBuf,
    existing: Option<Vec<u8>>,
}

fn stage_items(
    plan: &OrderedPlan,
    project_root: &Path,
    staging: &StagingTree,
    ledger: &mut Ledger,
    sentinel: &mut PathSentinel,
) -> Result<Vec<Staged>, RiteError> {
    let mut out = Vec::new();
    let mut pending: Vec<PendingMutation> = Vec::new();
    for item in &plan.items {
        if !matches!(item.kind, ItemKind::Form | ItemKind::Void) {
            continue;
        }
        let Some(path) = &item.path else { continue };
        let path_string = path.to_string_lossy().into_owned();
        let relative = sentinel.adjudicate(&path_string, project_root)?;

        if item.kind == ItemKind::Void {
            let prior = staging.materialize_prior(&relative)?;
            ledger.record(LedgerEntry::write_file(&staging.tx_id, ledger.next_sequence(), relative.clone(), prior));
            out.push(Staged {
                relative,
                is_dir: item.is_dir,
                is_delete: true,
                is_symlink: false,
                symlink_target: None,
                mode: None,
                action: ActionTaken::Deleted,
                bytes: None,
                fingerprint: None,
                blueprint_origin: item.blueprint_origin.clone(),
            });
            continue;
        }

        if item.is_dir {
            let staged_path = staging.staging_path(&relative);
            std::fs::create_dir_all(&staged_path)?;
            ledger.record(LedgerEntry::mkdir(&staging.tx_id, ledger.next_sequence(), relative.clone(), false));
            out.push(Staged {
                relative,
                is_dir: true,
                is_delete: false,
                is_symlink: false,
                symlink_target: None,
                mode: item.permissions.as_deref().and_then(parse_octal),
                action: ActionTaken::Created,
                bytes: None,
                fingerprint: None,
                blueprint_origin: item.blueprint_origin.clone(),
            });
            continue;
        }

        if item.is_symlink {
            let target = item.symlink_target.clone().unwrap_or_default();
            let staged_path = staging.staging_path(&relative);
            if let Some(parent) = staged_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if staged_path.exists() || staged_path.symlink_metadata().is_ok() {
                std::fs::remove_file(&staged_path).ok();
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &staged_path)?;
            out.push(Staged {
                relative,
                is_dir: false,
                is_delete: false,
                is_symlink: true,
                symlink_target: Some(target),
                mode: None,
                action: ActionTaken::Created,
                bytes: None,
                fingerprint: None,
                blueprint_origin: item.blueprint_origin.clone(),
            });
            continue;
        }

        let existing = staging.materialize_prior(&relative)?;
        if let Some(anchor) = &item.anchor_hash {
            let actual_hash = existing.as_deref().map(integrity::hash_bytes).unwrap_or_else(|| integrity::hash_bytes(b""));
            let actual_short = integrity::short_hash(&actual_hash).to_string();
            if &actual_short != anchor {
                return Err(RiteError::AnchorMismatch {
                    path: relative.display().to_string(),
                    expected: anchor.clone(),
                    actual: actual_short,
                });
            }
        }

        pending.push(PendingMutation { item, relative, existing });
    }

    // Worker pool (spec §4.5 "Worker pool"): content resolution and mutation
    // are pure given a path + prior bytes, so they run concurrently across
    // all pending Form items, mirroring the teacher's
    // `command_paths.par_iter().try_for_each(...)` help-smoke pass.
    let errors: Mutex<Vec<RiteError>> = Mutex::new(Vec::new());
    let resolved: Vec<Option<(Vec<u8>, ActionTaken)>> = pending
        .par_iter()
        .map(|p| {
            let outcome = resolve_seed_or_content(p.item, project_root)
                .and_then(|new_bytes| apply_mutation(&p.relative, p.item.mutation_op, p.existing.as_deref(), &new_bytes));
            match outcome {
                Ok(result) => Some(result),
                Err(err) => {
                    errors.lock().unwrap().push(err);
                    None
                }
            }
        })
        .collect();

    if let Some(err) = errors.into_inner().unwrap().into_iter().next() {
        return Err(err);
    }

    for (pending_item, outcome) in pending.into_iter().zip(resolved.into_iter()) {
        let PendingMutation { item, relative, existing } = pending_item;
        let (final_bytes, action) = outcome.expect("every pending item resolved without error");

        if let Some(existing_bytes) = &existing {
            if existing_bytes == &final_bytes {
                out.push(Staged {
                    relative: relative.clone(),
                    is_dir: false,
                    is_delete: false,
                    is_symlink: false,
                    symlink_target: None,
                    mode: item.permissions.as_deref().and_then(parse_octal),
                    action: ActionTaken::Skipped,
                    bytes: Some(final_bytes.clone()),
                    fingerprint: Some(integrity::hash_bytes(&final_bytes)),
                    blueprint_origin: item.blueprint_origin.clone(),
                });
                continue;
            }
        }

        let staged_path = staging.staging_path(&relative);
        if let Some(parent) = staged_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&staged_path, &final_bytes)?;
        ledger.record(LedgerEntry::write_file(&staging.tx_id, ledger.next_sequence(), relative.clone(), existing));

        let text_for_shebang = std::str::from_utf8(&final_bytes).unwrap_or("");
        let mode = item.permissions.as_deref().and_then(parse_octal).or_else(|| {
            enrichments::wants_shebang_consecration(text_for_shebang, &item.permissions).then_some(0o755)
        });

        out.push(Staged {
            relative,
            is_dir: false,
            is_delete: false,
            is_symlink: false,
            symlink_target: None,
            mode,
            action,
            bytes: Some(final_bytes.clone()),
            fingerprint: Some(integrity::hash_bytes(&final_bytes)),
            blueprint_origin: item.blueprint_origin.clone(),
        });
    }
    Ok(out)
}

/// Stage the Dynamic ignore veil (spec §2): append `.gitignore` entries for
/// any sensitive-extension file or `scaffold.lock` this rite just staged.
/// Runs as the last staged operation before Validate/Promote so the write
/// is atomic with the rest of the rite, and participates in rollback like
/// any other staged file.
fn stage_gitignore_veil(
    staging: &StagingTree,
    written_paths: &[PathBuf],
    staged: &mut Vec<Staged>,
    ledger: &mut Ledger,
) -> Result<(), RiteError> {
    let entries = enrichments::gitignore_entries_for(written_paths);
    if entries.is_empty() {
        return Ok(());
    }
    let relative = PathBuf::from(".gitignore");

    if let Some(existing) = staged.iter_mut().find(|s| s.relative == relative && !s.is_dir && !s.is_delete) {
        let mut text = existing.bytes.clone().map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default();
        append_missing_lines(&mut text, &entries);
        let final_bytes = text.into_bytes();
        std::fs::write(staging.staging_path(&relative), &final_bytes)?;
        existing.bytes = Some(final_bytes.clone());
        existing.fingerprint = Some(integrity::hash_bytes(&final_bytes));
        return Ok(());
    }

    let prior = staging.materialize_prior(&relative)?;
    let mut text = prior.as_deref().map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default();
    append_missing_lines(&mut text, &entries);
    let final_bytes = text.into_bytes();
    let staged_path = staging.staging_path(&relative);
    if let Some(parent) = staged_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&staged_path, &final_bytes)?;
    ledger.record(LedgerEntry::write_file(&staging.tx_id, ledger.next_sequence(), relative.clone(), prior));
    staged.push(Staged {
        relative,
        is_dir: false,
        is_delete: false,
        is_symlink: false,
        symlink_target: None,
        mode: None,
        action: ActionTaken::Created,
        bytes: Some(final_bytes.clone()),
        fingerprint: Some(integrity::hash_bytes(&final_bytes)),
        blueprint_origin: PathBuf::from(".scaffold/enrichments"),
    });
    Ok(())
}

fn append_missing_lines(text: &mut String, entries: &[String]) {
    for entry in entries {
        if !text.lines().any(|l| l == entry) {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(entry);
            text.push('\n');
        }
    }
}

fn resolve_seed_or_content(
    item: &crate::core::types::BlueprintItem,
    project_root: &Path,
) -> Result<Vec<u8>, RiteError> {
    if let Some(seed) = &item.seed_path {
        let seed_abs = if seed.is_absolute() {
            seed.clone()
        } else {
            item.blueprint_origin.parent().unwrap_or(project_root).join(seed)
        };
        let raw = std::fs::read(&seed_abs)?;
        let is_binary_ext = seed
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| BINARY_SEED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_binary_ext {
            return Ok(raw);
        }
        match String::from_utf8(raw.clone()) {
            Ok(text) => Ok(text.into_bytes()),
            Err(_) => Ok(raw),
        }
    } else if item.is_binary {
        let encoded = item.content.clone().unwrap_or_default();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RiteError::Validation(format!("invalid base64 content: {e}")))
    } else {
        Ok(item.content.clone().unwrap_or_default().into_bytes())
    }
}

fn apply_mutation(
    relative: &Path,
    op: MutationOp,
    existing: Option<&[u8]>,
    new_content: &[u8],
) -> Result<(Vec<u8>, ActionTaken), RiteError> {
    let is_structured = relative
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e, "json" | "yaml" | "yml" | "toml"))
        .unwrap_or(false);

    match (op, existing) {
        (MutationOp::Define, _) => Ok((new_content.to_vec(), ActionTaken::Created)),
        (MutationOp::Append, None) => Ok((new_content.to_vec(), ActionTaken::Created)),
        (MutationOp::Append, Some(old)) if is_structured => {
            let merged = merge_structured(relative, old, new_content)?;
            Ok((merged, ActionTaken::Transfigured))
        }
        (MutationOp::Append, Some(old)) => {
            let mut merged = old.to_vec();
            if !merged.ends_with(b"\n") && !merged.is_empty() {
                merged.push(b'\n');
            }
            merged.extend_from_slice(new_content);
            Ok((merged, ActionTaken::Transfigured))
        }
        (MutationOp::Prepend, None) => Ok((new_content.to_vec(), ActionTaken::Created)),
        (MutationOp::Prepend, Some(old)) => {
            let old_text = String::from_utf8_lossy(old);
            let mut lines = old_text.splitn(2, '\n');
            let first = lines.next().unwrap_or("");
            let rest = lines.next().unwrap_or("");
            let new_text = String::from_utf8_lossy(new_content);
            let merged = if first.starts_with("#!") || first.starts_with("# -*-") {
                format!("{first}\n{new_text}\n{rest}")
            } else {
                format!("{}\n{}", new_text, old_text)
            };
            Ok((merged.into_bytes(), ActionTaken::Transfigured))
        }
        (MutationOp::Subtract, None) => Ok((Vec::new(), ActionTaken::Created)),
        (MutationOp::Subtract, Some(old)) => {
            let old_text = String::from_utf8_lossy(old);
            let spec = String::from_utf8_lossy(new_content);
            let replaced = subtract(&spec, &old_text)?;
            Ok((replaced.into_bytes(), ActionTaken::Transfigured))
        }
        (MutationOp::Transfigure, None) => Ok((new_content.to_vec(), ActionTaken::Created)),
        (MutationOp::Transfigure, Some(old)) => {
            let spec = String::from_utf8_lossy(new_content);
            let old_text = String::from_utf8_lossy(old);
            let result = transfigure(&spec, &old_text)?;
            Ok((result.into_bytes(), ActionTaken::Transfigured))
        }
    }
}

/// Apply a Subtract spec against a file's current text. Spec §4.3: regex
/// removal by default, or literal substring removal when the spec carries
/// a `literal:` prefix.
fn subtract(spec: &str, old_text: &str) -> Result<String, RiteError> {
    if let Some(literal) = spec.strip_prefix("literal:") {
        return Ok(old_text.replace(literal, ""));
    }
    let regex = regex::Regex::new(spec).map_err(|e| RiteError::Validation(format!("invalid subtract pattern: {e}")))?;
    Ok(regex.replace_all(old_text, "").into_owned())
}

/// Apply a Transfigure spec against a file's current text. Spec §4.3:
/// `s/find/replace/flags` (sed-style regex substitution), `literal:...`
/// (whole-file swap), or the split-brain form (pattern on the header line,
/// replacement supplied in the following content block) encoded by the
/// parser via [`crate::core::types::decode_split_transfigure`].
fn transfigure(spec: &str, old_text: &str) -> Result<String, RiteError> {
    if let Some((pattern, replacement)) = crate::core::types::decode_split_transfigure(spec) {
        let regex = regex::Regex::new(&pattern)
            .map_err(|e| RiteError::Validation(format!("invalid transfigure pattern: {e}")))?;
        return Ok(regex.replace_all(old_text, replacement.as_str()).into_owned());
    }
    if let Some(literal) = spec.strip_prefix("literal:") {
        return Ok(literal.to_string());
    }
    if let Some(rest) = spec.strip_prefix("s/") {
        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        let [find, replace, flags] = parts.as_slice() else {
            return Err(RiteError::Validation(format!("malformed transfigure spec '{spec}'")));
        };
        let pattern = if flags.contains('i') { format!("(?i){find}") } else { find.to_string() };
        let regex = regex::Regex::new(&pattern)
            .map_err(|e| RiteError::Validation(format!("invalid transfigure pattern: {e}")))?;
        return Ok(if flags.contains('g') {
            regex.replace_all(old_text, *replace).into_owned()
        } else {
            regex.replace(old_text, *replace).into_owned()
        });
    }
    Ok(spec.to_string())
}

fn merge_structured(relative: &Path, old: &[u8], new: &[u8]) -> Result<Vec<u8>, RiteError> {
    match relative.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            let old_val: JsonValue = serde_json::from_slice(old).unwrap_or(JsonValue::Null);
            let new_val: JsonValue = serde_json::from_slice(new).unwrap_or(JsonValue::Null);
            let merged = merge_json(old_val, new_val);
            Ok(serde_json::to_vec_pretty(&merged)?)
        }
        Some("toml") => {
            let old_val: toml::Value = toml::from_str(&String::from_utf8_lossy(old)).unwrap_or(toml::Value::Table(Default::default()));
            let new_val: toml::Value = toml::from_str(&String::from_utf8_lossy(new)).unwrap_or(toml::Value::Table(Default::default()));
            let merged = merge_toml(old_val, new_val);
            Ok(toml::to_string_pretty(&merged)?.into_bytes())
        }
        _ => {
            let old_val: serde_yaml::Value = serde_yaml::from_slice(old).unwrap_or(serde_yaml::Value::Null);
            let new_val: serde_yaml::Value = serde_yaml::from_slice(new).unwrap_or(serde_yaml::Value::Null);
            let merged = merge_yaml(old_val, new_val);
            Ok(serde_yaml::to_string(&merged)?.into_bytes())
        }
    }
}

fn merge_json(old: JsonValue, new: JsonValue) -> JsonValue {
    match (old, new) {
        (JsonValue::Object(mut old_map), JsonValue::Object(new_map)) => {
            for (k, v) in new_map {
                let merged = match old_map.remove(&k) {
                    Some(existing) => merge_json(existing, v),
                    None => v,
                };
                old_map.insert(k, merged);
            }
            JsonValue::Object(old_map)
        }
        (JsonValue::Array(mut old_arr), JsonValue::Array(new_arr)) => {
            old_arr.extend(new_arr);
            JsonValue::Array(old_arr)
        }
        (_, new) => new,
    }
}

fn merge_yaml(old: serde_yaml::Value, new: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (old, new) {
        (Value::Mapping(mut old_map), Value::Mapping(new_map)) => {
            for (k, v) in new_map {
                let merged = match old_map.remove(&k) {
                    Some(existing) => merge_yaml(existing, v),
                    None => v,
                };
                old_map.insert(k, merged);
            }
            Value::Mapping(old_map)
        }
        (Value::Sequence(mut old_seq), Value::Sequence(new_seq)) => {
            old_seq.extend(new_seq);
            Value::Sequence(old_seq)
        }
        (_, new) => new,
    }
}

fn merge_toml(old: toml::Value, new: toml::Value) -> toml::Value {
    match (old, new) {
        (toml::Value::Table(mut old_map), toml::Value::Table(new_map)) => {
            for (k, v) in new_map {
                let merged = match old_map.remove(&k) {
                    Some(existing) => merge_toml(existing, v),
                    None => v,
                };
                old_map.insert(k, merged);
            }
            toml::Value::Table(old_map)
        }
        (toml::Value::Array(mut old_arr), toml::Value::Array(new_arr)) => {
            old_arr.extend(new_arr);
            toml::Value::Array(old_arr)
        }
        (_, new) => new,
    }
}

fn parse_octal(text: &str) -> Option<u32> {
    u32::from_str_radix(text, 8).ok()
}

fn validate_staging(staging: &StagingTree, staged: &[Staged]) -> Result<(), RiteError> {
    staged
        .par_iter()
        .filter(|item| !item.is_dir && !item.is_delete && !item.is_symlink)
        .try_for_each(|item| {
            let staged_path = staging.staging_path(&item.relative);
            if !staged_path.exists() {
                return Ok(());
            }
            if let Ok(text) = std::fs::read_to_string(&staged_path) {
                validators::validate_path(&item.relative, &text, None)?;
            }
            Ok(())
        })
}

fn promote(
    staging: &StagingTree,
    staged: &[Staged],
    sanctum: &dyn Sanctum,
    ledger: &mut Ledger,
) -> Result<(), RiteError> {
    // Directories first, so subsequent renames have a parent to land in.
    for item in staged.iter().filter(|i| i.is_dir) {
        sanctum.mkdir(&staging.project_path(&item.relative))?;
        if let Some(mode) = item.mode {
            sanctum.chmod(&staging.project_path(&item.relative), mode)?;
        }
    }

    for item in staged.iter().filter(|i| i.is_delete) {
        let project_path = staging.project_path(&item.relative);
        if sanctum.exists(&project_path) {
            sanctum.delete(&project_path, true)?;
        }
    }

    for item in staged.iter().filter(|i| !i.is_dir && !i.is_delete && i.action != ActionTaken::Skipped) {
        let project_path = staging.project_path(&item.relative);
        if item.is_symlink {
            let staged_path = staging.staging_path(&item.relative);
            let prior_target = std::fs::symlink_metadata(&project_path)
                .ok()
                .filter(|m| m.file_type().is_symlink())
                .and_then(|_| std::fs::read_link(&project_path).ok())
                .map(|t| t.to_string_lossy().into_owned().into_bytes());
            if project_path.exists() || project_path.symlink_metadata().is_ok() {
                std::fs::remove_file(&project_path).ok();
            }
            if let Some(parent) = project_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&staged_path, &project_path)?;
            ledger.record(LedgerEntry::symlink(&staging.tx_id, ledger.next_sequence(), item.relative.clone(), prior_target));
            continue;
        }
        let staged_path = staging.staging_path(&item.relative);
        let prior_mode = sanctum.stat(&project_path).map(|s| s.mode & 0o7777).ok();
        sanctum.rename(&staged_path, &project_path)?;
        if let Some(mode) = item.mode {
            sanctum.chmod(&project_path, mode)?;
            ledger.record(LedgerEntry::chmod(
                &staging.tx_id,
                ledger.next_sequence(),
                item.relative.clone(),
                prior_mode.unwrap_or(0o644),
                mode,
            ));
        }
    }
    Ok(())
}

/// Reassemble a manifest's path→sha256 pairs for merkle verification
/// outside a rite (used by `integrity` CLI checks).
pub fn manifest_pairs(manifest: &Manifest) -> BTreeMap<PathBuf, String> {
    manifest.manifest.iter().map(|(k, v)| (k.clone(), v.sha256.clone())).collect()
}

/// Pre-resolve `{{ }}` expressions in a standalone string, used by the CLI's
/// `validate` subcommand to check a blueprint without staging it.
pub fn preview_expression(text: &str, context: &JsonValue) -> Result<String, RiteError> {
    Ok(alchemist::transmute(text, context)?.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::LedgerOp;
    use crate::core::logger::SilentLogger;
    use crate::core::types::BlueprintItem;
    use tempfile::tempdir;

    fn form_item(path: &str, content: &str, op: MutationOp) -> BlueprintItem {
        let mut item = BlueprintItem::new(ItemKind::Form, 1, PathBuf::from("b.rite"));
        item.path = Some(PathBuf::from(path));
        item.content = Some(content.to_string());
        item.mutation_op = op;
        item
    }

    #[test]
    fn transfigure_sed_style_replaces_first_match() {
        let result = transfigure("s/port: 8080/port: 9090/", "port: 8080\nhost: local").unwrap();
        assert_eq!(result, "port: 9090\nhost: local");
    }

    #[test]
    fn transfigure_literal_swaps_whole_file() {
        let result = transfigure("literal:brand new contents", "old contents").unwrap();
        assert_eq!(result, "brand new contents");
    }

    #[test]
    fn transfigure_split_brain_applies_regex_replacement() {
        let spec = crate::core::types::encode_split_transfigure(r"port = \d+", "port = 9090");
        let result = transfigure(&spec, "port = 8080\nhost: local").unwrap();
        assert_eq!(result, "port = 9090\nhost: local");
    }

    #[test]
    fn subtract_defaults_to_regex_removal() {
        let result = subtract(r"TODO.*\n", "keep\nTODO: fix me\nkeep2\n").unwrap();
        assert_eq!(result, "keep\nkeep2\n");
    }

    #[test]
    fn subtract_literal_prefix_removes_exact_substring() {
        let result = subtract("literal:[draft] ", "[draft] Title\n[draft] appears twice [draft] ").unwrap();
        assert_eq!(result, "Title\nappears twice ");
    }

    #[test]
    fn materializes_a_minimal_plan() {
        let dir = tempdir().unwrap();
        let plan = OrderedPlan {
            items: vec![form_item("README.md", "hello world", MutationOp::Define)],
            edicts: vec![],
        };
        let outcome = materialize(&plan, dir.path(), "tx1", "2026-01-01T00:00:00Z", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("README.md")).unwrap(), "hello world");
        assert!(dir.path().join("scaffold.lock").exists());
    }

    #[test]
    fn append_mutation_concatenates_content() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "first\n").unwrap();
        let plan = OrderedPlan {
            items: vec![form_item("notes.txt", "second", MutationOp::Append)],
            edicts: vec![],
        };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        let result = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();
        assert_eq!(result, "first\nsecond");
    }

    #[test]
    fn identical_content_is_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "same").unwrap();
        let plan = OrderedPlan { items: vec![form_item("a.txt", "same", MutationOp::Define)], edicts: vec![] };
        let outcome = materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        assert_eq!(outcome.results[0].action_taken, ActionTaken::Skipped);
    }

    #[test]
    fn anchor_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "original").unwrap();
        let mut item = form_item("a.txt", "new", MutationOp::Append);
        item.anchor_hash = Some("deadbeef".to_string());
        let plan = OrderedPlan { items: vec![item], edicts: vec![] };
        let err = materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap_err();
        assert!(matches!(err, RiteError::AnchorMismatch { .. }));
    }

    #[test]
    fn prophesy_reports_created_without_writing() {
        let dir = tempdir().unwrap();
        let plan = OrderedPlan { items: vec![form_item("new.txt", "content", MutationOp::Define)], edicts: vec![] };
        let entries = prophesy(&plan, dir.path(), "tx1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ProphecyStatus::Created);
        assert!(!dir.path().join("new.txt").exists());
    }

    #[test]
    fn prophesy_reports_modified_with_diff() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old\n").unwrap();
        let plan = OrderedPlan { items: vec![form_item("a.txt", "new\n", MutationOp::Define)], edicts: vec![] };
        let entries = prophesy(&plan, dir.path(), "tx1").unwrap();
        assert_eq!(entries[0].status, ProphecyStatus::Modified);
        assert!(entries[0].diff.is_some());
    }

    #[test]
    fn json_append_deep_merges_objects() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"a": 1, "nested": {"x": 1}}"#).unwrap();
        let plan = OrderedPlan {
            items: vec![form_item("config.json", r#"{"b": 2, "nested": {"y": 2}}"#, MutationOp::Append)],
            edicts: vec![],
        };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        let text = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], 2);
        assert_eq!(value["nested"]["x"], 1);
        assert_eq!(value["nested"]["y"], 2);
    }

    #[test]
    fn toml_append_deep_merges_tables() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"a\"\n\n[dependencies]\nserde = \"1\"\n").unwrap();
        let plan = OrderedPlan {
            items: vec![form_item("Cargo.toml", "[dependencies]\ntokio = \"1\"\n", MutationOp::Append)],
            edicts: vec![],
        };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        let text = std::fs::read_to_string(dir.path().join("Cargo.toml")).unwrap();
        let value: toml::Value = toml::from_str(&text).unwrap();
        assert_eq!(value["package"]["name"].as_str(), Some("a"));
        assert_eq!(value["dependencies"]["serde"].as_str(), Some("1"));
        assert_eq!(value["dependencies"]["tokio"].as_str(), Some("1"));
    }

    #[test]
    fn sensitive_file_triggers_staged_gitignore_veil() {
        let dir = tempdir().unwrap();
        let plan = OrderedPlan {
            items: vec![form_item(".env", "SECRET=1", MutationOp::Define)],
            edicts: vec![],
        };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        let ignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(ignore.lines().any(|l| l == "/.env"));
    }

    #[test]
    fn directory_item_is_created() {
        let dir = tempdir().unwrap();
        let mut item = BlueprintItem::new(ItemKind::Form, 1, PathBuf::from("b.rite"));
        item.path = Some(PathBuf::from("src/nested"));
        item.is_dir = true;
        let plan = OrderedPlan { items: vec![item], edicts: vec![] };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        assert!(dir.path().join("src/nested").is_dir());
    }

    #[test]
    #[cfg(unix)]
    fn chmod_ledger_records_actual_prior_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.sh");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let mut item = form_item("run.sh", "new", MutationOp::Define);
        item.permissions = Some("755".to_string());
        let plan = OrderedPlan { items: vec![item], edicts: vec![] };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();

        let journal = std::fs::read_to_string(dir.path().join(".scaffold/journal.jsonl")).unwrap();
        let chmod_entry = journal
            .lines()
            .map(|l| serde_json::from_str::<LedgerEntry>(l).unwrap())
            .find(|entry| entry.op == LedgerOp::Chmod)
            .unwrap();
        assert_eq!(chmod_entry.prior_mode, Some(0o600));
    }

    #[test]
    fn symlink_creation_is_ledgered_and_reversible() {
        let dir = tempdir().unwrap();
        let mut item = BlueprintItem::new(ItemKind::Form, 1, PathBuf::from("b.rite"));
        item.path = Some(PathBuf::from("current"));
        item.is_symlink = true;
        item.symlink_target = Some(PathBuf::from("releases/1.0.0"));
        let plan = OrderedPlan { items: vec![item], edicts: vec![] };
        materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();

        let journal = std::fs::read_to_string(dir.path().join(".scaffold/journal.jsonl")).unwrap();
        let entries: Vec<LedgerEntry> = journal.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let symlink_entry = entries.iter().find(|e| e.op == LedgerOp::Symlink).unwrap();
        assert_eq!(symlink_entry.snapshot_content, None);

        let sanctum = LocalSanctum::new();
        let outcomes = reverser::reverse(&entries, &sanctum);
        assert!(outcomes.iter().all(|o| matches!(o, ReverseOutcome::Reversed)));
        assert!(!dir.path().join("current").exists() && dir.path().join("current").symlink_metadata().is_err());
    }

    #[test]
    fn void_item_deletes_existing_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "bye").unwrap();
        let mut item = BlueprintItem::new(ItemKind::Void, 1, PathBuf::from("b.rite"));
        item.path = Some(PathBuf::from("gone.txt"));
        let plan = OrderedPlan { items: vec![item], edicts: vec![] };
        let outcome = materialize(&plan, dir.path(), "tx1", "t", None, None, &serde_json::json!({}), &SilentLogger).unwrap();
        assert_eq!(outcome.deleted, vec![PathBuf::from("gone.txt")]);
        assert!(!dir.path().join("gone.txt").exists());
    }
}
