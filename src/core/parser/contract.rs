//! `%% contract Name[(Parent)]` typed-record definitions used to validate
//! variable values. Spec §4.3.

use super::block::consume_block_owned;
use crate::core::error::RiteError;
use crate::core::types::{BlueprintItem, ItemKind};
use std::path::{Path, PathBuf};

pub fn parse_contract(
    lines: &[&str],
    idx: usize,
    indent: usize,
    origin: &Path,
) -> Result<(BlueprintItem, usize), RiteError> {
    let raw = lines[idx];
    let trimmed = raw.trim_start();
    let line_num = idx + 1;
    let header = trimmed.strip_prefix("%% contract").unwrap().trim();

    let (name, parent) = match header.find('(') {
        Some(open) => {
            let name = header[..open].trim().to_string();
            let close = header.rfind(')').ok_or_else(|| RiteError::ParseHeresy {
                line: line_num,
                col: indent + 1,
                detail: "unterminated contract parent clause".to_string(),
            })?;
            (name, Some(header[open + 1..close].trim().to_string()))
        }
        None => (header.trim().to_string(), None),
    };
    if name.is_empty() {
        return Err(RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: "'%% contract' requires a name".to_string(),
        });
    }

    let (block, consumed) = consume_block_owned(lines, idx + 1, indent);
    let mut fields = Vec::new();
    for raw_line in &block {
        let field_trimmed = raw_line.trim();
        if field_trimmed.is_empty() || field_trimmed.starts_with('#') {
            continue;
        }
        fields.push(parse_field(field_trimmed, line_num)?);
    }

    let mut item = BlueprintItem::new(ItemKind::Contract, line_num, origin.to_path_buf());
    item.original_indent = indent;
    item.path = Some(PathBuf::from(format!("%%contract:{name}")));
    let serialized = serde_json::to_string(&ContractDef { name, parent, fields })
        .map_err(RiteError::Json)?;
    item.content = Some(serialized);

    Ok((item, 1 + consumed))
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContractDef {
    pub name: String,
    pub parent: Option<String>,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
    pub args: Vec<String>,
    pub default: Option<String>,
}

fn parse_field(line: &str, header_line: usize) -> Result<FieldDef, RiteError> {
    let (before_doc, _) = match line.find('#') {
        Some(pos) => (&line[..pos], &line[pos..]),
        None => (line, ""),
    };
    let before_doc = before_doc.trim();

    let (before_default, default) = match before_doc.find('=') {
        Some(pos) => (before_doc[..pos].trim(), Some(before_doc[pos + 1..].trim().to_string())),
        None => (before_doc, None),
    };

    let (name, type_part) = before_default.split_once(':').ok_or_else(|| RiteError::ParseHeresy {
        line: header_line,
        col: 1,
        detail: format!("contract field '{line}' missing ': type'"),
    })?;
    let type_part = type_part.trim();

    let (type_name, args) = match type_part.find('(') {
        Some(open) => {
            let close = type_part.rfind(')').ok_or_else(|| RiteError::ParseHeresy {
                line: header_line,
                col: 1,
                detail: format!("contract field '{line}' has unterminated type args"),
            })?;
            let args = type_part[open + 1..close]
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            (type_part[..open].trim().to_string(), args)
        }
        None => (type_part.to_string(), Vec::new()),
    };

    Ok(FieldDef {
        name: name.trim().to_string(),
        type_name,
        args,
        default,
    })
}
