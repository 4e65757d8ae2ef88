//! `$$name[: type] = expr` and `$$name[: type]:` block form.
//!
//! Grounded on
//! `examples/original_source/src/velm/parser_core/parser/parser_scribes/scaffold_scribes/variable_scribe.py`
//! (`BARE_ASSIGNMENT_REGEX`, dual inline/indented-block modes, quote-aware
//! comment stripping).

use super::block::{consume_block_owned, dedent};
use crate::core::error::RiteError;
use crate::core::types::{BlueprintItem, ItemKind, VariableDossier};
use std::path::{Path, PathBuf};

/// Parse a `$$` line (and its block, if in block form). Returns the item and
/// the number of raw source lines consumed.
pub fn parse_variable(
    lines: &[&str],
    idx: usize,
    indent: usize,
    origin: &Path,
    dossier: &mut VariableDossier,
) -> Result<(BlueprintItem, usize), RiteError> {
    let raw = lines[idx];
    let trimmed = raw.trim_start();
    let line_num = idx + 1;
    let body = &trimmed[2..]; // strip "$$"

    if let Some(eq_pos) = find_top_level_eq(body) {
        let (name_and_type, expr_raw) = body.split_at(eq_pos);
        let expr_raw = expr_raw[1..].trim();
        let (name, type_annotation) = split_name_type(name_and_type.trim());
        validate_name(&name, line_num)?;

        let value = purify_value(strip_trailing_comment(expr_raw));
        dossier.defined.insert(name.clone());
        dossier.defaults.insert(name.clone(), value.clone());
        if let Some(contract) = type_annotation {
            dossier.contracts.insert(name.clone(), contract);
        }

        let mut item = BlueprintItem::new(ItemKind::Variable, line_num, origin.to_path_buf());
        item.path = Some(PathBuf::from(format!("$${name}")));
        item.content = Some(value);
        item.original_indent = indent;
        return Ok((item, 1));
    }

    if let Some(colon_pos) = body.rfind(':') {
        if body[colon_pos + 1..].trim().is_empty() {
            let (name, type_annotation) = split_name_type(body[..colon_pos].trim());
            validate_name(&name, line_num)?;
            let (block, consumed) = consume_block_owned(lines, idx + 1, indent);
            let value = dedent(&block).trim_end().to_string();

            dossier.defined.insert(name.clone());
            dossier.defaults.insert(name.clone(), value.clone());
            if let Some(contract) = type_annotation {
                dossier.contracts.insert(name.clone(), contract);
            }

            let mut item = BlueprintItem::new(ItemKind::Variable, line_num, origin.to_path_buf());
            item.path = Some(PathBuf::from(format!("$${name}")));
            item.content = Some(value);
            item.original_indent = indent;
            return Ok((item, 1 + consumed));
        }
    }

    Err(RiteError::ParseHeresy {
        line: line_num,
        col: indent + 1,
        detail: format!("malformed variable declaration '{trimmed}'"),
    })
}

fn find_top_level_eq(body: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    for (i, ch) in body.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '=' if !in_single && !in_double => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_name_type(name_and_type: &str) -> (String, Option<String>) {
    match name_and_type.split_once(':') {
        Some((name, ty)) => (name.trim().to_string(), Some(ty.trim().to_string())),
        None => (name_and_type.trim().to_string(), None),
    }
}

fn validate_name(name: &str, line_num: usize) -> Result<(), RiteError> {
    let valid = !name.is_empty()
        && name.chars().next().unwrap().is_ascii_alphabetic()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(RiteError::ParseHeresy {
            line: line_num,
            col: 1,
            detail: format!("invalid variable name '{name}'"),
        });
    }
    Ok(())
}

/// Strip a trailing `# comment` unless the `#` sits inside a quoted string.
fn strip_trailing_comment(expr: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    for (i, ch) in expr.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return expr[..i].trim_end(),
            _ => {}
        }
    }
    expr
}

/// Strip one layer of matching surrounding quotes, if present.
fn purify_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 {
        let first = trimmed.chars().next().unwrap();
        let last = trimmed.chars().last().unwrap();
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}
