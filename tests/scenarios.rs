//! End-to-end scenario tests driving the parser, weaver, and materializer
//! together the way `lib.rs::build_plan`/`run_rite` do, but against
//! `tempfile::tempdir()` project roots instead of a real CLI invocation.

use rite::core::error::RiteError;
use rite::core::ledger::LedgerEntry;
use rite::core::logger::SilentLogger;
use rite::core::materializer::{self, ProphecyStatus};
use rite::core::parser;
use rite::core::reverser::{self, ReverseOutcome};
use rite::core::sanctum::LocalSanctum;
use rite::core::types::OrderedPlan;
use rite::core::weaver;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use tempfile::tempdir;

fn weave_blueprint(text: &str, context: &serde_json::Value) -> Result<OrderedPlan, RiteError> {
    let mut visited = HashSet::new();
    let parsed = parser::parse_blueprint(text, Path::new("blueprint.rite"), &mut visited)?;
    assert!(parsed.heresies.is_empty(), "unexpected heresies: {:?}", parsed.heresies);
    let load_trait = |_: &Path| -> Result<String, RiteError> { Err(RiteError::NotFound("no traits in this test".into())) };
    let mut plan = weaver::weave(parsed.items, parsed.edicts, context, &load_trait)?;
    weaver::transmute_plan(&mut plan, context)?;
    Ok(plan)
}

#[test]
fn minimal_form_materializes_a_file() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
README.md :: "# {{ project_name }}"
"#;
    let context = json!({ "project_name": "widget" });
    let plan = weave_blueprint(blueprint, &context).unwrap();

    let outcome = materializer::materialize(&plan, dir.path(), "tx1", "t", None, None, &context, &SilentLogger).unwrap();
    assert_eq!(outcome.results.len(), 1);
    let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
    assert_eq!(content, "# widget");
}

#[test]
fn conditional_gate_skips_disabled_branch() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
@if use_docker
  Dockerfile :: "FROM rust:1.90"
@endif
"#;
    let context = json!({ "use_docker": false });
    let plan = weave_blueprint(blueprint, &context).unwrap();

    let outcome = materializer::materialize(&plan, dir.path(), "tx1", "t", None, None, &context, &SilentLogger).unwrap();
    assert_eq!(outcome.results.len(), 0);
    assert!(!dir.path().join("Dockerfile").exists());
}

#[test]
fn append_mutation_is_idempotent_on_rerun() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
notes.txt += "one more line\n"
"#;
    let context = json!({});
    let plan = weave_blueprint(blueprint, &context).unwrap();

    materializer::materialize(&plan, dir.path(), "tx1", "t", None, None, &context, &SilentLogger).unwrap();
    let after_first = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();

    let plan2 = weave_blueprint(blueprint, &context).unwrap();
    let outcome2 = materializer::materialize(&plan2, dir.path(), "tx2", "t", None, None, &context, &SilentLogger).unwrap();
    let after_second = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();

    assert_eq!(after_first, after_second);
    assert!(outcome2.results.iter().all(|r| matches!(r.action_taken, rite::core::types::ActionTaken::Skipped)));
}

#[test]
fn dry_run_prophecy_never_writes() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
src/main.rs :: "fn main() {}"
"#;
    let context = json!({});
    let plan = weave_blueprint(blueprint, &context).unwrap();

    let entries = materializer::prophesy(&plan, dir.path(), "prophecy-1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ProphecyStatus::Created);
    assert!(!dir.path().join("src/main.rs").exists());
}

#[test]
fn post_run_edict_executes_and_is_ledgered() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
marker.txt :: "present"

%% post-run
  >> touch symphony-ran.txt
"#;
    let context = json!({});
    let plan = weave_blueprint(blueprint, &context).unwrap();
    assert_eq!(plan.edicts.len(), 1);

    materializer::materialize(&plan, dir.path(), "tx1", "t", None, None, &context, &SilentLogger).unwrap();
    assert!(dir.path().join("symphony-ran.txt").exists());

    let journal = std::fs::read_to_string(dir.path().join(".scaffold/journal.jsonl")).unwrap();
    assert!(journal.lines().any(|l| l.contains("ExecShell")));
}

#[test]
fn undo_restores_the_project_to_its_pre_rite_state() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
README.md :: "# {{ project_name }}"
src/main.rs :: "fn main() {}"
config/app.yaml :: "name: {{ project_name }}"
"#;
    let context = json!({ "project_name": "widget" });
    let plan = weave_blueprint(blueprint, &context).unwrap();

    let tx_id = "tx-undo-1";
    materializer::materialize(&plan, dir.path(), tx_id, "t", None, None, &context, &SilentLogger).unwrap();
    assert!(dir.path().join("README.md").exists());
    assert!(dir.path().join("src/main.rs").exists());
    assert!(dir.path().join("config/app.yaml").exists());

    let journal = std::fs::read_to_string(dir.path().join(".scaffold/journal.jsonl")).unwrap();
    let entries: Vec<LedgerEntry> = journal
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .filter(|entry: &LedgerEntry| entry.tx_id == tx_id)
        .collect();
    assert!(!entries.is_empty());

    let sanctum = LocalSanctum::new();
    let outcomes = reverser::reverse(&entries, &sanctum);
    assert!(outcomes.iter().all(|o| matches!(o, ReverseOutcome::Reversed)));

    assert!(!dir.path().join("README.md").exists());
    assert!(!dir.path().join("src/main.rs").exists());
    assert!(!dir.path().join("config/app.yaml").exists());
}

#[test]
fn failing_post_run_edict_rolls_back_the_whole_rite() {
    let dir = tempdir().unwrap();
    let blueprint = r#"
marker.txt :: "present"

%% post-run
  >> exit 7
"#;
    let context = json!({});
    let plan = weave_blueprint(blueprint, &context).unwrap();

    let result = materializer::materialize(&plan, dir.path(), "tx1", "t", None, None, &context, &SilentLogger);
    assert!(result.is_err());
    assert!(!dir.path().join("marker.txt").exists());
}
