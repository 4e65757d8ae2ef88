//! The blueprint data model: items, the variable dossier, and rite results.
//!
//! Grounded on `examples/original_source/src/velm/contracts/data_contracts.py`
//! (`ScaffoldItem`, `GnosticWriteResult`) and spec.md §3.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// The kind of a single parsed blueprint line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Form,
    Variable,
    Logic,
    Trait,
    Void,
    Contract,
}

/// How a Form item's content combines with an existing target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MutationOp {
    /// `::` — write/overwrite, the default.
    #[default]
    Define,
    /// `+=` — append.
    Append,
    /// `^=` — prepend (after any shebang/encoding header line).
    Prepend,
    /// `-=` — remove matching text.
    Subtract,
    /// `~=` — regex/literal substitution.
    Transfigure,
}

impl MutationOp {
    pub fn from_operator(op: &str) -> Option<Self> {
        match op {
            "::" => Some(Self::Define),
            "+=" => Some(Self::Append),
            "^=" => Some(Self::Prepend),
            "-=" => Some(Self::Subtract),
            "~=" => Some(Self::Transfigure),
            _ => None,
        }
    }

    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::Define)
    }
}

/// A single unit of structural intent produced by the parser.
///
/// Before weaving, `path` and `content` may still contain unresolved
/// `{{ expr }}` template expressions — the Alchemist resolves those during
/// staging, not during parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintItem {
    /// Semantic (possibly still-templated) relative path, or a sentinel name
    /// such as `$$ name` for Variable items.
    pub path: Option<PathBuf>,
    pub kind: ItemKind,
    pub is_dir: bool,
    pub content: Option<String>,
    pub seed_path: Option<PathBuf>,
    /// Octal permission string (already resolved from semantic names like
    /// `executable`/`secret` by the parser).
    pub permissions: Option<String>,
    pub mutation_op: MutationOp,
    /// 8-hex prefix the target's current SHA-256 must match before a
    /// mutation is allowed to apply.
    pub anchor_hash: Option<String>,
    pub original_indent: usize,
    pub line_num: usize,
    pub blueprint_origin: PathBuf,
    pub is_symlink: bool,
    pub symlink_target: Option<PathBuf>,
    pub is_binary: bool,
}

impl BlueprintItem {
    pub fn new(kind: ItemKind, line_num: usize, origin: PathBuf) -> Self {
        Self {
            path: None,
            kind,
            is_dir: false,
            content: None,
            seed_path: None,
            permissions: None,
            mutation_op: MutationOp::Define,
            anchor_hash: None,
            original_indent: 0,
            line_num,
            blueprint_origin: origin,
            is_symlink: false,
            symlink_target: None,
            is_binary: false,
        }
    }
}

/// Severity of a non-fatal diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeresySeverity {
    Warning,
    Critical,
}

/// A tagged diagnostic accumulated during parsing, weaving, or materialization.
///
/// Fatal heresies are also raised as a [`crate::core::error::RiteError`] at
/// the point of failure; `Heresy` is the uniform shape used to *report* every
/// diagnostic (fatal or not) in a rite's final result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heresy {
    pub kind: String,
    pub severity: HeresySeverity,
    pub detail: String,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub suggestion: Option<String>,
}

impl Heresy {
    pub fn warning(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: HeresySeverity::Warning,
            detail: detail.into(),
            line: None,
            col: None,
            suggestion: None,
        }
    }

    pub fn critical(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: HeresySeverity::Critical,
            detail: detail.into(),
            line: None,
            col: None,
            suggestion: None,
        }
    }

    pub fn at(mut self, line: usize, col: usize) -> Self {
        self.line = Some(line);
        self.col = Some(col);
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Required/defined/default/contract bookkeeping for a blueprint's variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableDossier {
    pub required: HashSet<String>,
    pub defined: HashSet<String>,
    pub defaults: BTreeMap<String, String>,
    pub contracts: BTreeMap<String, String>,
}

/// Built-in variable names that never need to be `required` even if used.
pub const BUILTIN_VARIABLES: &[&str] = &["cwd", "now", "year", "month", "day", "user", "os"];

impl VariableDossier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables referenced but neither defined by the blueprint nor built in.
    pub fn missing(&self, provided: &HashSet<String>) -> Vec<String> {
        let mut missing: Vec<String> = self
            .required
            .iter()
            .filter(|name| {
                !self.defined.contains(*name)
                    && !provided.contains(*name)
                    && !BUILTIN_VARIABLES.contains(&name.as_str())
                    && !self.defaults.contains_key(*name)
            })
            .cloned()
            .collect();
        missing.sort();
        missing
    }
}

/// The flat, control-flow-free output of the AST Weaver.
#[derive(Debug, Clone, Default)]
pub struct OrderedPlan {
    pub items: Vec<BlueprintItem>,
    pub edicts: Vec<crate::core::parser::symphony::Edict>,
}

/// What actually happened when an item was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionTaken {
    Created,
    Transfigured,
    Skipped,
    Translocated,
    Deleted,
}

/// The outcome of materializing a single plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub path: PathBuf,
    pub success: bool,
    pub action_taken: ActionTaken,
    pub bytes_written: u64,
    pub fingerprint: Option<String>,
    pub dependencies: Vec<String>,
    pub blueprint_origin: PathBuf,
}

/// Separator used to pack a split-brain Transfigure's pattern and
/// replacement into a `BlueprintItem`'s single `content` slot. Spec §4.3:
/// the pattern appears on the `~=` header line, the replacement in the
/// following indented content block.
const SPLIT_TRANSFIGURE_SENTINEL: &str = "\u{1}rite-split-transfigure\u{1}";

/// Encode a split-brain Transfigure's pattern/replacement pair for storage
/// in `BlueprintItem::content`.
pub fn encode_split_transfigure(pattern: &str, replacement: &str) -> String {
    format!("{SPLIT_TRANSFIGURE_SENTINEL}{pattern}{SPLIT_TRANSFIGURE_SENTINEL}{replacement}")
}

/// Decode a string produced by [`encode_split_transfigure`], returning
/// `None` if it isn't one (an ordinary Transfigure spec).
pub fn decode_split_transfigure(content: &str) -> Option<(String, String)> {
    let rest = content.strip_prefix(SPLIT_TRANSFIGURE_SENTINEL)?;
    let (pattern, replacement) = rest.split_once(SPLIT_TRANSFIGURE_SENTINEL)?;
    Some((pattern.to_string(), replacement.to_string()))
}
