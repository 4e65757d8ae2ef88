//! Form items: directories, inline/block content, seeds, symlinks,
//! mutations, permission suffixes, and anchor-hash preconditions. Spec
//! §4.3 "A path token ... followed by a structural operator".
//!
//! Grounded on the block-vs-inline dispatch, backslash-escape purification,
//! and permission-name resolution in
//! `examples/original_source/src/velm/parser_core/parser/parser_scribes/scaffold_scribes/structural_scribe.py`
//! (`_conduct_indented_content_rite`, `_conduct_explicit_multiline_rite`,
//! `_proclaim_item`'s `PERMISSION_MAP`).

use super::block::{consume_block_owned, dedent};
use crate::core::error::RiteError;
use crate::core::types::{BlueprintItem, ItemKind, MutationOp, VariableDossier};
use std::path::{Path, PathBuf};

fn resolve_permission(token: &str) -> String {
    match token {
        "executable" => "755".to_string(),
        "secret" => "600".to_string(),
        "readonly" => "444".to_string(),
        other => other.to_string(),
    }
}

/// Parse a path-headed Form line, possibly consuming an indented or
/// explicit multiline block that follows it.
pub fn parse_form(
    lines: &[&str],
    idx: usize,
    indent: usize,
    origin: &Path,
    dossier: &mut VariableDossier,
) -> Result<(BlueprintItem, usize), RiteError> {
    let raw = lines[idx];
    let trimmed = raw.trim_start();
    let line_num = idx + 1;

    let (path_token, remainder) = split_path_token(trimmed);

    let mut item = BlueprintItem::new(ItemKind::Form, line_num, origin.to_path_buf());
    item.original_indent = indent;

    if remainder.trim().is_empty() && path_token.ends_with('/') {
        item.is_dir = true;
        item.path = Some(PathBuf::from(path_token.trim_end_matches('/')));
        register_path_variables(path_token, dossier);
        return Ok((item, 1));
    }

    item.path = Some(PathBuf::from(path_token));
    register_path_variables(path_token, dossier);

    if remainder.trim().is_empty() {
        // Bare path: empty file, unless an indented block follows on
        // subsequent lines (`path:` form without the main-op handled below).
        return Ok((item, 1));
    }

    let rest = remainder.trim_start();

    if let Some(after) = rest.strip_prefix(':') {
        if !after.trim().is_empty() && !after.trim_start().starts_with(':') {
            return Err(RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: format!("unexpected trailing content after 'path:' header: '{after}'"),
            });
        }
        let (block, consumed) = consume_block_owned(lines, idx + 1, indent);
        let content = dedent(&block).trim_end().to_string();
        register_content_variables(&content, dossier);
        item.content = Some(purify_escapes(&content));
        return Ok((item, 1 + consumed));
    }

    let (op_str, after_op) = take_operator(rest).ok_or_else(|| RiteError::ParseHeresy {
        line: line_num,
        col: indent + 1,
        detail: format!("unrecognized form suffix '{rest}'"),
    })?;

    match op_str {
        "::" | "+=" | "^=" | "-=" | "~=" => {
            if op_str != "::" {
                item.mutation_op = MutationOp::from_operator(op_str).unwrap();
            }
            let clause = after_op.trim_start();

            // Split-brain Transfigure: `path ~= "pattern":` followed by an
            // indented content block holding the replacement.
            if op_str == "~=" {
                if let Some((pattern, trailer)) = extract_quoted(clause) {
                    if trailer.trim_start() == ":" {
                        let (block, consumed) = consume_block_owned(lines, idx + 1, indent);
                        let replacement = dedent(&block).trim_end().to_string();
                        register_content_variables(&replacement, dossier);
                        item.content = Some(crate::core::types::encode_split_transfigure(
                            &pattern,
                            &purify_escapes(&replacement),
                        ));
                        return Ok((item, 1 + consumed));
                    }
                }
            }

            if let Some(delim) = starts_triple_quote(clause) {
                let (block, consumed) = consume_block_owned(lines, idx + 1, indent);
                let content = take_until_closing_delim(&block, delim);
                register_content_variables(&content, dossier);
                item.content = Some(purify_escapes(&content));
                return Ok((item, 1 + consumed));
            }
            let (literal, trailer) = extract_quoted(clause).ok_or_else(|| RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: "expected quoted content after operator".to_string(),
            })?;
            register_content_variables(&literal, dossier);
            item.content = Some(purify_escapes(&literal));
            apply_trailer(&mut item, trailer, line_num, indent)?;
            Ok((item, 1))
        }
        "<<" => {
            let (seed, trailer) = split_first_token(after_op.trim_start());
            item.seed_path = Some(PathBuf::from(seed));
            apply_trailer(&mut item, trailer, line_num, indent)?;
            Ok((item, 1))
        }
        "->" => {
            let (target, trailer) = split_first_token(after_op.trim_start());
            item.is_symlink = true;
            item.symlink_target = Some(PathBuf::from(target));
            apply_trailer(&mut item, trailer, line_num, indent)?;
            Ok((item, 1))
        }
        _ => unreachable!(),
    }
}

/// Parse a single-line form used by `@if expr -> path :: "content"`'s
/// inline body (no block forms allowed inline).
pub fn parse_inline_form(
    form_src: &str,
    line_num: usize,
    indent: usize,
    origin: &Path,
) -> Result<BlueprintItem, RiteError> {
    let (path_token, remainder) = split_path_token(form_src);
    let mut item = BlueprintItem::new(ItemKind::Form, line_num, origin.to_path_buf());
    item.original_indent = indent;

    if remainder.trim().is_empty() && path_token.ends_with('/') {
        item.is_dir = true;
        item.path = Some(PathBuf::from(path_token.trim_end_matches('/')));
        return Ok(item);
    }
    item.path = Some(PathBuf::from(path_token));
    if remainder.trim().is_empty() {
        return Ok(item);
    }
    let rest = remainder.trim_start();
    let (op_str, after_op) = take_operator(rest).ok_or_else(|| RiteError::ParseHeresy {
        line: line_num,
        col: indent + 1,
        detail: format!("unrecognized inline form suffix '{rest}'"),
    })?;
    match op_str {
        "::" | "+=" | "^=" | "-=" | "~=" => {
            if op_str != "::" {
                item.mutation_op = MutationOp::from_operator(op_str).unwrap();
            }
            let (literal, trailer) =
                extract_quoted(after_op.trim_start()).ok_or_else(|| RiteError::ParseHeresy {
                    line: line_num,
                    col: indent + 1,
                    detail: "expected quoted content in inline form".to_string(),
                })?;
            item.content = Some(purify_escapes(&literal));
            apply_trailer(&mut item, trailer, line_num, indent)?;
        }
        "<<" => {
            let (seed, trailer) = split_first_token(after_op.trim_start());
            item.seed_path = Some(PathBuf::from(seed));
            apply_trailer(&mut item, trailer, line_num, indent)?;
        }
        "->" => {
            let (target, trailer) = split_first_token(after_op.trim_start());
            item.is_symlink = true;
            item.symlink_target = Some(PathBuf::from(target));
            apply_trailer(&mut item, trailer, line_num, indent)?;
        }
        _ => unreachable!(),
    }
    Ok(item)
}

/// `%% trait Name = path` / `%% use Name k=v`.
pub fn parse_trait(
    lines: &[&str],
    idx: usize,
    indent: usize,
    origin: &Path,
) -> Result<(BlueprintItem, usize), RiteError> {
    let raw = lines[idx];
    let trimmed = raw.trim_start();
    let line_num = idx + 1;
    let body = trimmed.strip_prefix("%%").unwrap().trim();

    let mut item = BlueprintItem::new(ItemKind::Trait, line_num, origin.to_path_buf());
    item.original_indent = indent;

    if let Some(rest) = body.strip_prefix("trait") {
        let rest = rest.trim();
        let (name, path) = rest.split_once('=').ok_or_else(|| RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: "'%% trait' requires 'Name = path'".to_string(),
        })?;
        item.path = Some(PathBuf::from(path.trim().trim_matches('"')));
        item.content = Some(format!("trait:{}", name.trim()));
        return Ok((item, 1));
    }
    if let Some(rest) = body.strip_prefix("use") {
        let rest = rest.trim();
        let mut parts = rest.split_whitespace();
        let name = parts.next().ok_or_else(|| RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: "'%% use' requires a trait name".to_string(),
        })?;
        let overrides: Vec<String> = parts.map(|s| s.to_string()).collect();
        item.content = Some(format!("use:{}:{}", name, overrides.join(",")));
        return Ok((item, 1));
    }
    Err(RiteError::ParseHeresy {
        line: line_num,
        col: indent + 1,
        detail: format!("unrecognized trait directive '{body}'"),
    })
}

fn apply_trailer(
    item: &mut BlueprintItem,
    trailer: &str,
    line_num: usize,
    indent: usize,
) -> Result<(), RiteError> {
    let mut rest = trailer.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("%%") {
            let (token, remainder) = split_first_token(after.trim_start());
            item.permissions = Some(resolve_permission(token));
            rest = remainder.trim_start();
        } else if let Some(after) = rest.strip_prefix("@hash:") {
            let (token, remainder) = split_first_token(after);
            item.anchor_hash = Some(token.to_string());
            rest = remainder.trim_start();
        } else {
            return Err(RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: format!("unrecognized trailing suffix '{rest}'"),
            });
        }
    }
    Ok(())
}

/// Split a Form line's leading path from its suffix. Handles operators
/// glued directly to the path (`README.md::"x"`) as well as space-separated
/// ones, and recognizes a bare trailing `:` or `/` at end-of-line as part
/// of the path token (block-header / directory markers).
fn split_path_token(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    while i < len {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            return (&line[..i], &line[i..]);
        }
        if i + 1 < len && ["::", "<<", "->", "+=", "^=", "-=", "~="].contains(&&line[i..i + 2]) {
            return (&line[..i], &line[i..]);
        }
        if c == ':' && i + 1 == len {
            return (&line[..i], &line[i..]);
        }
        if c == '/' && i + 1 == len {
            return (&line[..i + 1], "");
        }
        i += 1;
    }
    (line, "")
}

fn split_first_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Recognize a leading structural operator and return it with the rest of
/// the string after it.
fn take_operator(s: &str) -> Option<(&'static str, &str)> {
    for op in ["::", "<<", "->", "+=", "^=", "-=", "~="] {
        if let Some(rest) = s.strip_prefix(op) {
            return Some((op, rest));
        }
    }
    None
}

fn starts_triple_quote(s: &str) -> Option<&'static str> {
    if s.starts_with("\"\"\"") {
        Some("\"\"\"")
    } else if s.starts_with("'''") {
        Some("'''")
    } else {
        None
    }
}

/// Extract a single-quoted or double-quoted literal from the start of `s`,
/// returning the literal (unescaped of surrounding quotes only) and
/// whatever trails after the closing quote.
fn extract_quoted(s: &str) -> Option<(String, &str)> {
    let mut chars = s.char_indices();
    let (_, quote) = chars.next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let mut escaped = false;
    for (i, ch) in chars {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == quote {
            let literal = &s[1..i];
            let rest = &s[i + 1..];
            return Some((literal.replace("\\\"", "\"").replace("\\'", "'"), rest));
        }
    }
    None
}

/// Join block lines after a `"""`/`'''` opener, stopping at the matching
/// closer if one appears on its own line (otherwise the whole block is
/// content, as produced by `consume_block_owned`'s barrier rule).
fn take_until_closing_delim(block: &[String], delim: &str) -> String {
    let dedented = dedent(block);
    match dedented.find(delim) {
        Some(pos) => dedented[..pos].trim_end_matches('\n').to_string(),
        None => dedented.trim_end().to_string(),
    }
}

/// Un-escape backslash-escaped triple-quote delimiters inside block content,
/// mirroring the original's purification of `\"\"\"`/`\'\'\'` sequences.
fn purify_escapes(content: &str) -> String {
    content.replace("\\\"\\\"\\\"", "\"\"\"").replace("\\'\\'\\'", "'''")
}

fn register_path_variables(path_token: &str, dossier: &mut VariableDossier) {
    for name in crate::core::alchemist::discover_variables(path_token) {
        dossier.required.insert(name);
    }
}

fn register_content_variables(content: &str, dossier: &mut VariableDossier) {
    for name in crate::core::alchemist::discover_variables(content) {
        dossier.required.insert(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directory_form() {
        let lines = vec!["src/"];
        let mut dossier = VariableDossier::new();
        let (item, consumed) =
            parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(consumed, 1);
        assert!(item.is_dir);
        assert_eq!(item.path, Some(PathBuf::from("src")));
    }

    #[test]
    fn parses_inline_literal_content() {
        let lines = vec!["README.md :: \"# {{ name }}\""];
        let mut dossier = VariableDossier::new();
        let (item, _) = parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(item.content.as_deref(), Some("# {{ name }}"));
        assert!(dossier.required.contains("name"));
    }

    #[test]
    fn parses_bare_empty_file() {
        let lines = vec![".gitkeep"];
        let mut dossier = VariableDossier::new();
        let (item, _) = parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(item.content, None);
        assert!(!item.is_dir);
    }

    #[test]
    fn parses_indented_block_content() {
        let lines = vec!["src/lib.rs:", "  fn main() {}", "  // done"];
        let mut dossier = VariableDossier::new();
        let (item, consumed) =
            parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(item.content.as_deref(), Some("fn main() {}\n// done"));
    }

    #[test]
    fn parses_seed_and_permission() {
        let lines = vec!["bin/run.sh << templates/run.sh %% executable"];
        let mut dossier = VariableDossier::new();
        let (item, _) = parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(item.seed_path, Some(PathBuf::from("templates/run.sh")));
        assert_eq!(item.permissions.as_deref(), Some("755"));
    }

    #[test]
    fn parses_mutation_with_anchor_hash() {
        let lines = vec!["Cargo.toml += \"\\n[dev-dependencies]\" @hash:abcd1234"];
        let mut dossier = VariableDossier::new();
        let (item, _) = parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(item.mutation_op, MutationOp::Append);
        assert_eq!(item.anchor_hash.as_deref(), Some("abcd1234"));
    }

    #[test]
    fn parses_symlink() {
        let lines = vec!["current -> releases/1.0.0"];
        let mut dossier = VariableDossier::new();
        let (item, _) = parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert!(item.is_symlink);
        assert_eq!(item.symlink_target, Some(PathBuf::from("releases/1.0.0")));
    }

    #[test]
    fn parses_split_brain_transfigure() {
        let lines = vec!["config.toml ~= \"port = \\\\d+\":", "  port = 9090"];
        let mut dossier = VariableDossier::new();
        let (item, consumed) =
            parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(item.mutation_op, MutationOp::Transfigure);
        let (pattern, replacement) =
            crate::core::types::decode_split_transfigure(item.content.as_deref().unwrap()).unwrap();
        assert_eq!(pattern, "port = \\d+");
        assert_eq!(replacement, "port = 9090");
    }

    #[test]
    fn explicit_triple_quote_block_dedents() {
        let lines = vec!["docs/NOTES.md :: \"\"\"", "  line one", "  line two", "  \"\"\""];
        let mut dossier = VariableDossier::new();
        let (item, consumed) =
            parse_form(&lines, 0, 0, Path::new("b.rite"), &mut dossier).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(item.content.as_deref(), Some("line one\nline two"));
    }
}
