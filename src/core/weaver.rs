//! AST Weaver: evaluates conditionals and expands traits on the parsed item
//! stream, producing a flat, control-flow-free [`OrderedPlan`]. Spec §4.4.
//!
//! Grounded on
//! `examples/original_source/src/velm/parser_core/parser/ast_weaver/node_factory.py`
//! (indent-tree construction, conditional pruning, trait splice with
//! lexically-scoped variable overrides).

use crate::core::alchemist;
use crate::core::error::RiteError;
use crate::core::parser::{self, symphony::Edict};
use crate::core::types::{BlueprintItem, ItemKind, OrderedPlan};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Evaluate a `Logic` item's condition string (already stripped of its
/// `if `/`elif ` prefix by the caller) against the accumulated context.
///
/// Supports: bare identifier truthiness, `not expr`, `a == b`/`a != b`
/// (string/bool/number equality), and `a and b`/`a or b` (left-to-right,
/// no precedence climbing — matches the informal grammar's scope).
fn eval_condition(expr: &str, context: &Value) -> Result<bool, RiteError> {
    let expr = expr.trim();
    if let Some((lhs, rhs)) = split_top_level(expr, " or ") {
        return Ok(eval_condition(lhs, context)? || eval_condition(rhs, context)?);
    }
    if let Some((lhs, rhs)) = split_top_level(expr, " and ") {
        return Ok(eval_condition(lhs, context)? && eval_condition(rhs, context)?);
    }
    if let Some(rest) = expr.strip_prefix("not ") {
        return Ok(!eval_condition(rest, context)?);
    }
    if let Some((lhs, rhs)) = split_top_level(expr, "==") {
        return Ok(resolve_value(lhs.trim(), context) == resolve_value(rhs.trim(), context));
    }
    if let Some((lhs, rhs)) = split_top_level(expr, "!=") {
        return Ok(resolve_value(lhs.trim(), context) != resolve_value(rhs.trim(), context));
    }
    Ok(is_truthy(&resolve_value(expr, context)))
}

fn split_top_level<'a>(expr: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    expr.find(sep).map(|pos| (&expr[..pos], &expr[pos + sep.len()..]))
}

fn resolve_value(token: &str, context: &Value) -> Value {
    let token = token.trim();
    if let Some(stripped) = token.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::String(stripped.to_string());
    }
    if let Some(stripped) = token.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Value::String(stripped.to_string());
    }
    if token == "true" {
        return Value::Bool(true);
    }
    if token == "false" {
        return Value::Bool(false);
    }
    if let Ok(n) = token.parse::<i64>() {
        return Value::Number(n.into());
    }
    let mut current = context;
    for segment in token.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Weave a parsed item stream into a flat [`OrderedPlan`], resolving
/// conditionals and expanding traits. `load_trait` resolves a trait's
/// source path to its raw text (supplied by the caller so the weaver stays
/// decoupled from the Sanctum).
pub fn weave(
    items: Vec<BlueprintItem>,
    edicts: Vec<Edict>,
    context: &Value,
    load_trait: &dyn Fn(&Path) -> Result<String, RiteError>,
) -> Result<OrderedPlan, RiteError> {
    let mut trait_defs: std::collections::HashMap<String, PathBuf> = std::collections::HashMap::new();
    for item in &items {
        if item.kind == ItemKind::Trait {
            if let Some(content) = &item.content {
                if let Some(name) = content.strip_prefix("trait:") {
                    if let Some(path) = &item.path {
                        trait_defs.insert(name.to_string(), path.clone());
                    }
                }
            }
        }
    }

    let mut result = Vec::new();
    let mut skip_stack: Vec<bool> = Vec::new();
    let mut branch_taken: Vec<bool> = Vec::new();

    for item in items {
        if item.kind == ItemKind::Logic {
            let content = item.content.clone().unwrap_or_default();
            if let Some(expr) = content.strip_prefix("if ") {
                let taken = eval_condition(expr, context)?;
                skip_stack.push(!taken);
                branch_taken.push(taken);
                continue;
            }
            if let Some(expr) = content.strip_prefix("elif ") {
                let parent_taken = *branch_taken.last().ok_or_else(|| RiteError::ParseHeresy {
                    line: item.line_num,
                    col: 1,
                    detail: "@elif without matching @if".to_string(),
                })?;
                if parent_taken {
                    if let Some(skip) = skip_stack.last_mut() {
                        *skip = true;
                    }
                } else {
                    let taken = eval_condition(expr, context)?;
                    if let Some(skip) = skip_stack.last_mut() {
                        *skip = !taken;
                    }
                    if let Some(bt) = branch_taken.last_mut() {
                        *bt = taken;
                    }
                }
                continue;
            }
            if content == "else" {
                let parent_taken = *branch_taken.last().ok_or_else(|| RiteError::ParseHeresy {
                    line: item.line_num,
                    col: 1,
                    detail: "@else without matching @if".to_string(),
                })?;
                if let Some(skip) = skip_stack.last_mut() {
                    *skip = parent_taken;
                }
                continue;
            }
            if content == "endif" {
                skip_stack.pop();
                branch_taken.pop();
                continue;
            }
            // `def name = expr` aliases are variable-resolution concerns
            // already folded into the context by the caller; nothing to do
            // here at weave time.
            continue;
        }

        if item.kind == ItemKind::Trait {
            // Definitions are registered above; skip them in the output.
            if item
                .content
                .as_deref()
                .map(|c| c.starts_with("trait:"))
                .unwrap_or(false)
            {
                continue;
            }
            if skip_stack.iter().any(|s| *s) {
                continue;
            }
            if let Some(content) = &item.content {
                if let Some(rest) = content.strip_prefix("use:") {
                    let mut parts = rest.splitn(2, ':');
                    let name = parts.next().unwrap_or("");
                    let overrides_str = parts.next().unwrap_or("");
                    let trait_path = trait_defs.get(name).ok_or_else(|| RiteError::NotFound(
                        format!("trait '{name}' is not defined"),
                    ))?;
                    let mut trait_context = context.clone();
                    if let Value::Object(map) = &mut trait_context {
                        for pair in overrides_str.split(',').filter(|s| !s.is_empty()) {
                            if let Some((k, v)) = pair.split_once('=') {
                                map.insert(k.to_string(), Value::String(v.to_string()));
                            }
                        }
                    }
                    let text = load_trait(trait_path)?;
                    let mut visited = HashSet::new();
                    let parsed = parser::parse_blueprint(&text, trait_path, &mut visited)?;
                    let sub_plan = weave(parsed.items, parsed.edicts, &trait_context, load_trait)?;
                    for mut spliced in sub_plan.items {
                        spliced.original_indent += item.original_indent;
                        result.push(spliced);
                    }
                }
            }
            continue;
        }

        if skip_stack.iter().any(|s| *s) {
            continue;
        }
        result.push(item);
    }

    Ok(OrderedPlan { items: result, edicts })
}

/// Resolve `{{ }}` expressions in a plan's paths and inline content against
/// the final variable context, using the Alchemist. Seed-file content is
/// left untouched here — the Materializer decides transmute-vs-copy based
/// on the known-binary extension set.
pub fn transmute_plan(plan: &mut OrderedPlan, context: &Value) -> Result<(), RiteError> {
    for item in &mut plan.items {
        if let Some(path) = item.path.take() {
            let raw = path.to_string_lossy().to_string();
            let resolved = alchemist::transmute(&raw, context)?;
            item.path = Some(PathBuf::from(resolved.text));
        }
        if let Some(content) = item.content.take() {
            if item.seed_path.is_none() {
                let resolved = alchemist::transmute(&content, context)?;
                item.is_binary = item.is_binary || resolved.is_binary;
                item.content = Some(resolved.text);
            } else {
                item.content = Some(content);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ItemKind;
    use serde_json::json;

    fn logic(content: &str, indent: usize, line: usize) -> BlueprintItem {
        let mut item = BlueprintItem::new(ItemKind::Logic, line, PathBuf::from("b.rite"));
        item.content = Some(content.to_string());
        item.original_indent = indent;
        item
    }

    fn form(path: &str, line: usize) -> BlueprintItem {
        let mut item = BlueprintItem::new(ItemKind::Form, line, PathBuf::from("b.rite"));
        item.path = Some(PathBuf::from(path));
        item
    }

    #[test]
    fn prunes_false_branch() {
        let items = vec![
            logic("if use_docker", 0, 1),
            form("Dockerfile", 2),
            logic("endif", 0, 3),
        ];
        let ctx = json!({"use_docker": false});
        let plan = weave(items, vec![], &ctx, &|_| unreachable!()).unwrap();
        assert!(plan.items.is_empty());
    }

    #[test]
    fn keeps_true_branch() {
        let items = vec![
            logic("if use_docker", 0, 1),
            form("Dockerfile", 2),
            logic("endif", 0, 3),
        ];
        let ctx = json!({"use_docker": true});
        let plan = weave(items, vec![], &ctx, &|_| unreachable!()).unwrap();
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].path, Some(PathBuf::from("Dockerfile")));
    }

    #[test]
    fn else_branch_runs_when_if_false() {
        let items = vec![
            logic("if use_docker", 0, 1),
            form("Dockerfile", 2),
            logic("else", 0, 3),
            form("Makefile", 4),
            logic("endif", 0, 5),
        ];
        let ctx = json!({"use_docker": false});
        let plan = weave(items, vec![], &ctx, &|_| unreachable!()).unwrap();
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].path, Some(PathBuf::from("Makefile")));
    }

    #[test]
    fn condition_equality_and_boolean_ops() {
        let ctx = json!({"env": "prod", "use_docker": true});
        assert!(eval_condition("env == \"prod\"", &ctx).unwrap());
        assert!(!eval_condition("env != \"prod\"", &ctx).unwrap());
        assert!(eval_condition("env == \"prod\" and use_docker", &ctx).unwrap());
        assert!(eval_condition("not use_docker or env == \"prod\"", &ctx).unwrap());
    }

    #[test]
    fn transmute_plan_resolves_path_and_content() {
        let mut item = form("{{ name }}/README.md", 1);
        item.content = Some("# {{ name }}".to_string());
        let mut plan = OrderedPlan { items: vec![item], edicts: vec![] };
        let ctx = json!({"name": "widget"});
        transmute_plan(&mut plan, &ctx).unwrap();
        assert_eq!(plan.items[0].path, Some(PathBuf::from("widget/README.md")));
        assert_eq!(plan.items[0].content.as_deref(), Some("# widget"));
    }
}
