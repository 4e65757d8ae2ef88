//! Rite: a transactional, declarative project-scaffolding engine.
//!
//! A blueprint (`.rite` file) describes directories, files, variables,
//! conditionals, traits, and post-run commands. Rite parses it, weaves out
//! its control flow against a variable context, and materializes the
//! result atomically: either the whole rite lands, or nothing does, and
//! every committed rite can be reversed.
//!
//! # Crate structure
//!
//! - [`core::parser`]: tokenizes blueprint text into an item stream.
//! - [`core::weaver`]: evaluates conditionals, expands traits, resolves templates.
//! - [`core::materializer`]: the Begin/Stage/Validate/Promote/Commit transaction.
//! - [`core::ledger`] / [`core::reverser`]: the undo log and its inverse engine.
//! - [`core::chronicle`]: the `scaffold.lock` manifest.

pub mod cli;
pub mod core;

use crate::core::error::RiteError;
use crate::core::ledger::LedgerEntry;
use crate::core::logger::{ColoredLogger, Logger, SilentLogger};
use crate::core::materializer::{self, ProphecyStatus};
use crate::core::parser;
use crate::core::prompter::{Plea, PleaKind, NonInteractivePrompter, Prompter, StdinPrompter};
use crate::core::reverser;
use crate::core::sanctum::LocalSanctum;
use crate::core::types::{BlueprintItem, ItemKind, OrderedPlan, VariableDossier};
use crate::core::weaver;
use cli::{Cli, Command, RunCli, UndoCli, ValidateCli};
use clap::Parser;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

pub fn run() -> Result<(), RiteError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("rite {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Run(run_cli) => run_rite(run_cli),
        Command::DryRun(run_cli) => run_prophecy(run_cli),
        Command::Validate(validate_cli) => run_validate(validate_cli),
        Command::Undo(undo_cli) => run_undo(undo_cli),
    }
}

fn make_logger(verbose: bool) -> Box<dyn Logger> {
    Box::new(ColoredLogger::new(verbose))
}

fn run_rite(cli: RunCli) -> Result<(), RiteError> {
    let logger = make_logger(cli.verbose);
    let project_root = resolve_project_root(&cli.dir)?;
    let blueprint_path = cli.file.clone();

    let (plan, context, heresies) = build_plan(&blueprint_path, &cli.vars, cli.non_interactive, logger.as_ref())?;
    report_heresies(&heresies, logger.as_ref());

    let tx_id = Ulid::new().to_string();
    let timestamp = unix_timestamp();
    let architect = std::env::var("USER").ok();
    let git_commit = current_git_commit(&project_root);

    let outcome = materializer::materialize(
        &plan,
        &project_root,
        &tx_id,
        &timestamp,
        architect,
        git_commit,
        &context,
        logger.as_ref(),
    )?;

    for warning in &outcome.warnings {
        logger.warn(warning);
    }

    if cli.json {
        let summary = serde_json::json!({
            "tx_id": tx_id,
            "files_written": outcome.results.len(),
            "files_deleted": outcome.deleted.len(),
            "merkle_root": outcome.manifest.integrity.merkle_root,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        logger.info(&format!(
            "rite complete: {} file(s) written, {} deleted (tx {tx_id})",
            outcome.results.len(),
            outcome.deleted.len()
        ));
    }
    Ok(())
}

fn run_prophecy(cli: RunCli) -> Result<(), RiteError> {
    let logger = make_logger(cli.verbose);
    let project_root = resolve_project_root(&cli.dir)?;
    let (plan, _context, heresies) = build_plan(&cli.file, &cli.vars, cli.non_interactive, logger.as_ref())?;
    report_heresies(&heresies, logger.as_ref());

    let tx_id = format!("prophecy-{}", Ulid::new());
    let entries = materializer::prophesy(&plan, &project_root, &tx_id)?;

    if cli.json {
        let serializable: Vec<Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "path": e.path.display().to_string(),
                    "status": prophecy_status_label(&e.status),
                    "diff": e.diff,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serializable)?);
    } else {
        for entry in &entries {
            println!("{} {}", prophecy_status_label(&entry.status), entry.path.display());
            if let Some(diff) = &entry.diff {
                for line in diff.lines() {
                    println!("  {line}");
                }
            }
        }
    }
    Ok(())
}

fn prophecy_status_label(status: &ProphecyStatus) -> &'static str {
    match status {
        ProphecyStatus::Created => "created",
        ProphecyStatus::Modified => "modified",
        ProphecyStatus::Deleted => "deleted",
        ProphecyStatus::Unchanged => "unchanged",
    }
}

fn run_validate(cli: ValidateCli) -> Result<(), RiteError> {
    let logger = SilentLogger::new();
    let (_, _, heresies) = build_plan(&cli.file, &cli.vars, true, &logger)?;
    if heresies.is_empty() {
        println!("no heresies found");
    } else {
        report_heresies(&heresies, &ColoredLogger::new(true));
    }
    Ok(())
}

fn run_undo(cli: UndoCli) -> Result<(), RiteError> {
    let logger = make_logger(cli.verbose);
    let project_root = resolve_project_root(&cli.dir)?;
    let journal_path = project_root.join(".scaffold/journal.jsonl");
    if !journal_path.exists() {
        logger.warn("no journal found; nothing to undo");
        return Ok(());
    }

    let text = fs::read_to_string(&journal_path)?;
    let all_entries: Vec<LedgerEntry> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(RiteError::Json))
        .collect::<Result<_, _>>()?;

    let target_tx = match &cli.tx {
        Some(tx) => tx.clone(),
        None => all_entries
            .last()
            .map(|e| e.tx_id.clone())
            .ok_or_else(|| RiteError::NotFound("journal is empty".to_string()))?,
    };

    let (to_reverse, remaining): (Vec<_>, Vec<_>) =
        all_entries.into_iter().partition(|e| e.tx_id == target_tx);
    if to_reverse.is_empty() {
        return Err(RiteError::NotFound(format!("no journal entries for transaction '{target_tx}'")));
    }

    let sanctum = LocalSanctum::new();
    let outcomes = reverser::reverse(&to_reverse, &sanctum);
    let failures = outcomes.iter().filter(|o| matches!(o, reverser::ReverseOutcome::Failed(_))).count();
    logger.info(&format!(
        "reversed transaction '{target_tx}': {} step(s), {failures} failure(s)",
        outcomes.len()
    ));

    let mut rewritten = String::new();
    for entry in &remaining {
        rewritten.push_str(&serde_json::to_string(entry)?);
        rewritten.push('\n');
    }
    fs::write(&journal_path, rewritten)?;
    Ok(())
}

/// Parse, weave, and template-resolve a blueprint into a materializer-ready
/// plan, resolving any missing variables via the Prompter.
fn build_plan(
    file: &Path,
    cli_vars: &[(String, String)],
    non_interactive: bool,
    logger: &dyn Logger,
) -> Result<(OrderedPlan, Value, Vec<crate::core::types::Heresy>), RiteError> {
    let text = fs::read_to_string(file)
        .map_err(|_| RiteError::NotFound(file.display().to_string()))?;
    let origin = fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
    let mut visited = HashSet::new();
    let parsed = parser::parse_blueprint(&text, &origin, &mut visited)?;

    let provided: HashSet<String> = cli_vars.iter().map(|(k, _)| k.clone()).collect();
    let prompter: Box<dyn Prompter> =
        if non_interactive { Box::new(NonInteractivePrompter::new()) } else { Box::new(StdinPrompter::new()) };

    let context = build_context(&parsed.items, &parsed.dossier, cli_vars, &provided, prompter.as_ref(), logger)?;

    let blueprint_dir = origin.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let load_trait = move |trait_path: &Path| -> Result<String, RiteError> {
        let resolved = if trait_path.is_absolute() { trait_path.to_path_buf() } else { blueprint_dir.join(trait_path) };
        fs::read_to_string(&resolved).map_err(|_| RiteError::NotFound(resolved.display().to_string()))
    };

    let mut plan = weaver::weave(parsed.items, parsed.edicts.clone(), &context, &load_trait)?;
    weaver::transmute_plan(&mut plan, &context)?;

    Ok((plan, context, parsed.heresies))
}

/// Build the variable context: built-ins, then each declared variable's
/// (possibly templated) default resolved in declaration order, then CLI
/// overrides, then a Prompter pass for anything still missing.
fn build_context(
    items: &[BlueprintItem],
    dossier: &VariableDossier,
    cli_vars: &[(String, String)],
    provided: &HashSet<String>,
    prompter: &dyn Prompter,
    logger: &dyn Logger,
) -> Result<Value, RiteError> {
    let mut map = Map::new();
    map.insert("cwd".to_string(), Value::String(std::env::current_dir()?.display().to_string()));
    map.insert("os".to_string(), Value::String(std::env::consts::OS.to_string()));
    map.insert("user".to_string(), Value::String(std::env::var("USER").unwrap_or_default()));
    let (year, month, day) = today();
    map.insert("year".to_string(), Value::String(year));
    map.insert("month".to_string(), Value::String(month));
    map.insert("day".to_string(), Value::String(day));
    map.insert("now".to_string(), Value::String(unix_timestamp()));

    for (k, v) in cli_vars {
        if let Some(contract) = dossier.contracts.get(k) {
            crate::core::contracts::validate(k, v, contract)?;
        }
        map.insert(k.clone(), Value::String(v.clone()));
    }

    for item in items.iter().filter(|i| i.kind == ItemKind::Variable) {
        let Some(path) = &item.path else { continue };
        let name = path.to_string_lossy().trim_start_matches("$$").to_string();
        if map.contains_key(&name) {
            continue;
        }
        let default_expr = item.content.clone().unwrap_or_default();
        let context_so_far = Value::Object(map.clone());
        let resolved = crate::core::alchemist::transmute(&default_expr, &context_so_far)?;
        if let Some(contract) = dossier.contracts.get(&name) {
            crate::core::contracts::validate(&name, &resolved.text, contract)?;
        }
        map.insert(name, Value::String(resolved.text));
    }

    for name in dossier.missing(provided) {
        let default = dossier.defaults.get(&name).cloned();
        let plea = Plea {
            name: name.clone(),
            kind: PleaKind::Text,
            message: format!("Provide a value for '{name}'"),
            default,
            choices: None,
        };
        let answer = prompter.ask(&plea)?;
        if let Some(contract) = dossier.contracts.get(&name) {
            crate::core::contracts::validate(&name, &answer, contract)?;
        }
        logger.verbose(&format!("resolved gnosis '{name}' = '{answer}'"));
        map.insert(name, Value::String(answer));
    }

    Ok(Value::Object(map))
}

fn report_heresies(heresies: &[crate::core::types::Heresy], logger: &dyn Logger) {
    for heresy in heresies {
        let line = match (heresy.line, heresy.col) {
            (Some(l), Some(c)) => format!(" (line {l}, col {c})"),
            _ => String::new(),
        };
        let message = format!("{}: {}{}", heresy.kind, heresy.detail, line);
        match heresy.severity {
            crate::core::types::HeresySeverity::Warning => logger.warn(&message),
            crate::core::types::HeresySeverity::Critical => logger.error(&message),
        }
    }
}

fn resolve_project_root(dir: &Option<PathBuf>) -> Result<PathBuf, RiteError> {
    let target = match dir {
        Some(d) => d.clone(),
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&target)?;
    Ok(fs::canonicalize(&target)?)
}

fn unix_timestamp() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    secs.to_string()
}

/// A minimal, dependency-free `(year, month, day)` derivation from the Unix
/// epoch (proleptic Gregorian, UTC), since the teacher's stack carries no
/// date/time crate.
fn today() -> (String, String, String) {
    let days = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0) / 86_400;
    let mut year = 1970i64;
    let mut remaining = days as i64;
    loop {
        let len = if is_leap(year) { 366 } else { 365 };
        if remaining < len {
            break;
        }
        remaining -= len;
        year += 1;
    }
    const MONTH_LENS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0usize;
    for (i, len) in MONTH_LENS.iter().enumerate() {
        let len = if i == 1 && is_leap(year) { 29 } else { *len };
        if remaining < len {
            month = i;
            break;
        }
        remaining -= len;
    }
    (year.to_string(), format!("{:02}", month + 1), format!("{:02}", remaining + 1))
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn current_git_commit(project_root: &Path) -> Option<String> {
    let head = fs::read_to_string(project_root.join(".git/HEAD")).ok()?;
    let head = head.trim();
    if let Some(ref_path) = head.strip_prefix("ref: ") {
        fs::read_to_string(project_root.join(".git").join(ref_path)).ok().map(|s| s.trim().to_string())
    } else {
        Some(head.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_matches_known_epoch_day() {
        // 2024-01-01 was day 19723 since epoch; also a leap year boundary.
        let (year, month, day) = today_for_days(19723);
        assert_eq!((year.as_str(), month.as_str(), day.as_str()), ("2024", "01", "01"));
    }

    fn today_for_days(days: i64) -> (String, String, String) {
        let mut year = 1970i64;
        let mut remaining = days;
        loop {
            let len = if is_leap(year) { 366 } else { 365 };
            if remaining < len {
                break;
            }
            remaining -= len;
            year += 1;
        }
        const MONTH_LENS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
        let mut month = 0usize;
        for (i, len) in MONTH_LENS.iter().enumerate() {
            let len = if i == 1 && is_leap(year) { 29 } else { *len };
            if remaining < len {
                month = i;
                break;
            }
            remaining -= len;
        }
        (year.to_string(), format!("{:02}", month + 1), format!("{:02}", remaining + 1))
    }

    #[test]
    fn is_leap_handles_century_rule() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(is_leap(2024));
        assert!(!is_leap(2023));
    }
}
