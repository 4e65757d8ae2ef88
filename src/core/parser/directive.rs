//! `@if`/`@elif`/`@else`/`@endif`, `@include`, `@def`, and diagnostic
//! directives (`@error`/`@warn`/`@print`). Spec §4.3.
//!
//! `@include` splicing and the Ouroboros visited-set guard are grounded on
//! the recursive sub-parser invocation in
//! `examples/original_source/src/velm/parser_core/parser/parser_scribes/scaffold_scribes/structural_scribe.py`
//! (`_conduct_trait_usage`), generalized here to whole-blueprint includes.

use super::{parse_blueprint, structural, ParseOutput};
use crate::core::error::RiteError;
use crate::core::types::{BlueprintItem, Heresy, HeresySeverity, ItemKind};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Parse an `@if`/`@elif`/`@else`/`@endif`/`@def` line. The inline form
/// (`@if expr -> path :: "content"`) produces the gate plus its single
/// child form item plus a synthetic `@endif` closing it.
pub fn parse_logic(
    trimmed: &str,
    line_num: usize,
    indent: usize,
    origin: &Path,
) -> Result<Vec<BlueprintItem>, RiteError> {
    if let Some(rest) = trimmed.strip_prefix("@endif") {
        if !rest.trim().is_empty() {
            return Err(RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: "@endif takes no arguments".to_string(),
            });
        }
        let mut item = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
        item.content = Some("endif".to_string());
        item.original_indent = indent;
        return Ok(vec![item]);
    }
    if let Some(rest) = trimmed.strip_prefix("@else") {
        if !rest.trim().is_empty() {
            return Err(RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: "@else takes no arguments".to_string(),
            });
        }
        let mut item = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
        item.content = Some("else".to_string());
        item.original_indent = indent;
        return Ok(vec![item]);
    }
    if let Some(rest) = trimmed.strip_prefix("@elif") {
        let expr = rest.trim();
        if expr.is_empty() {
            return Err(RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: "@elif requires a condition".to_string(),
            });
        }
        let mut item = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
        item.content = Some(format!("elif {expr}"));
        item.original_indent = indent;
        return Ok(vec![item]);
    }
    if let Some(rest) = trimmed.strip_prefix("@if") {
        return parse_if(rest, line_num, indent, origin);
    }
    if let Some(rest) = trimmed.strip_prefix("@def") {
        let body = rest.trim();
        let (name, expr) = body.split_once('=').ok_or_else(|| RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: "@def requires 'name = expr'".to_string(),
        })?;
        let mut item = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
        item.content = Some(format!("def {} = {}", name.trim(), expr.trim()));
        item.original_indent = indent;
        return Ok(vec![item]);
    }
    Err(RiteError::ParseHeresy {
        line: line_num,
        col: indent + 1,
        detail: format!("unrecognized logic directive '{trimmed}'"),
    })
}

fn parse_if(
    rest: &str,
    line_num: usize,
    indent: usize,
    origin: &Path,
) -> Result<Vec<BlueprintItem>, RiteError> {
    let rest = rest.trim();
    if let Some(arrow_pos) = find_inline_arrow(rest) {
        let (expr, form_src) = rest.split_at(arrow_pos);
        let expr = expr.trim();
        let form_src = form_src[2..].trim();
        if expr.is_empty() {
            return Err(RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: "@if requires a condition".to_string(),
            });
        }
        let mut gate = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
        gate.content = Some(format!("if {expr}"));
        gate.original_indent = indent;

        let child = structural::parse_inline_form(form_src, line_num, indent + 1, origin)?;

        let mut endif = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
        endif.content = Some("endif".to_string());
        endif.original_indent = indent;

        return Ok(vec![gate, child, endif]);
    }

    if rest.is_empty() {
        return Err(RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: "@if requires a condition".to_string(),
        });
    }
    let mut gate = BlueprintItem::new(ItemKind::Logic, line_num, origin.to_path_buf());
    gate.content = Some(format!("if {rest}"));
    gate.original_indent = indent;
    Ok(vec![gate])
}

/// Find the `->` that separates an inline `@if` condition from its body,
/// ignoring any `->` that appears inside a quoted string.
fn find_inline_arrow(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match bytes[i] as char {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '-' if !in_single && !in_double && bytes[i + 1] == b'>' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

pub fn parse_diagnostic(trimmed: &str, line_num: usize) -> Result<Heresy, RiteError> {
    let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("@error") {
        ("UserError", rest)
    } else if let Some(rest) = trimmed.strip_prefix("@warn") {
        ("UserWarning", rest)
    } else {
        ("UserPrint", trimmed.strip_prefix("@print").unwrap_or(trimmed))
    };
    let severity = if kind == "UserError" {
        HeresySeverity::Critical
    } else {
        HeresySeverity::Warning
    };
    Ok(Heresy {
        kind: kind.to_string(),
        severity,
        detail: rest.trim().trim_matches('"').to_string(),
        line: Some(line_num),
        col: None,
        suggestion: None,
    })
}

/// Splice the blueprint named by an `@include "path"` line at the current
/// position. Returns the spliced output and how many raw lines the
/// directive itself consumed (always 1).
pub fn parse_include<'a>(
    lines: &[&'a str],
    idx: usize,
    indent: usize,
    origin: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Result<(ParseOutput, usize), RiteError> {
    let raw = lines[idx];
    let trimmed = raw.trim_start();
    let line_num = idx + 1;
    let rest = trimmed.strip_prefix("@include").unwrap_or("").trim();
    let path_str = rest.trim_matches('"').trim_matches('\'');
    if path_str.is_empty() {
        return Err(RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: "@include requires a path".to_string(),
        });
    }

    let base_dir = origin.parent().unwrap_or_else(|| Path::new("."));
    let include_path = base_dir.join(path_str);
    let canonical = fs::canonicalize(&include_path).unwrap_or_else(|_| include_path.clone());

    if visited.contains(&canonical) {
        return Err(RiteError::ImportCycle {
            cycle: format!("{} -> {}", origin.display(), include_path.display()),
        });
    }

    let text = fs::read_to_string(&include_path).map_err(RiteError::Io)?;
    visited.insert(canonical.clone());
    let mut spliced = parse_blueprint(&text, &include_path, visited)?;
    visited.remove(&canonical);

    for item in &mut spliced.items {
        item.original_indent += indent;
    }

    Ok((spliced, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_if() {
        let items = parse_logic("@if use_docker", 1, 0, Path::new("b.rite")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content.as_deref(), Some("if use_docker"));
    }

    #[test]
    fn parses_inline_if_form() {
        let items =
            parse_logic("@if use_docker -> Dockerfile :: \"FROM rust\"", 1, 0, Path::new("b.rite"))
                .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].content.as_deref(), Some("if use_docker"));
        assert_eq!(items[2].content.as_deref(), Some("endif"));
    }

    #[test]
    fn parses_elif_and_else_and_endif() {
        assert_eq!(
            parse_logic("@elif x", 1, 0, Path::new("b")).unwrap()[0]
                .content
                .as_deref(),
            Some("elif x")
        );
        assert_eq!(
            parse_logic("@else", 1, 0, Path::new("b")).unwrap()[0]
                .content
                .as_deref(),
            Some("else")
        );
        assert_eq!(
            parse_logic("@endif", 1, 0, Path::new("b")).unwrap()[0]
                .content
                .as_deref(),
            Some("endif")
        );
    }

    #[test]
    fn rejects_empty_if_condition() {
        assert!(parse_logic("@if", 1, 0, Path::new("b")).is_err());
    }

    #[test]
    fn diagnostic_error_is_critical() {
        let heresy = parse_diagnostic("@error \"bad config\"", 3).unwrap();
        assert_eq!(heresy.severity, HeresySeverity::Critical);
        assert_eq!(heresy.detail, "bad config");
    }

    #[test]
    fn diagnostic_warn_is_warning() {
        let heresy = parse_diagnostic("@warn deprecated", 3).unwrap();
        assert_eq!(heresy.severity, HeresySeverity::Warning);
    }
}
