//! CLI struct definitions for the `rite` command-line interface.
//!
//! All clap-derived types live here; dispatch logic lives in `lib.rs::run()`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "rite",
    version = env!("CARGO_PKG_VERSION"),
    about = "Rite: a transactional, declarative project-scaffolding engine",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Print the version.
    Version,
    /// Perform the rite: materialize a blueprint into the project root.
    Run(RunCli),
    /// Perform the rite without writing anything; report what would change.
    DryRun(RunCli),
    /// Parse and weave a blueprint, reporting heresies, without materializing.
    Validate(ValidateCli),
    /// Reverse the most recent committed rite (or a named transaction).
    Undo(UndoCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    /// Path to the blueprint file.
    #[clap(short, long, default_value = "blueprint.rite")]
    pub file: PathBuf,
    /// Target project root (defaults to the current directory).
    #[clap(short = 'C', long)]
    pub dir: Option<PathBuf>,
    /// `key=value` variable bindings, repeatable.
    #[clap(long = "var", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,
    /// Never prompt; fail instead of asking for a missing variable.
    #[clap(long)]
    pub non_interactive: bool,
    /// Print verbose diagnostics.
    #[clap(short, long)]
    pub verbose: bool,
    /// Emit machine-readable JSON instead of human-readable text.
    #[clap(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ValidateCli {
    /// Path to the blueprint file.
    #[clap(short, long, default_value = "blueprint.rite")]
    pub file: PathBuf,
    /// `key=value` variable bindings, repeatable.
    #[clap(long = "var", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct UndoCli {
    /// Target project root (defaults to the current directory).
    #[clap(short = 'C', long)]
    pub dir: Option<PathBuf>,
    /// Transaction ID to reverse (defaults to the most recent in the journal).
    #[clap(long)]
    pub tx: Option<String>,
    /// Print verbose diagnostics.
    #[clap(short, long)]
    pub verbose: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}
