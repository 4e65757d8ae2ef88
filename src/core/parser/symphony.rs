//! Symphony sublanguage: Action (`>>`), Vow (`??`), and State (`%%`) edicts
//! used inside `%% post-run:`/`%% on-heresy:`/`%% on-undo:` blocks and in
//! standalone `.symphony`/`.arch` files. Spec §4.3.

use super::block::consume_block_owned;
use crate::core::error::RiteError;
use serde::{Deserialize, Serialize};

const KNOWN_STATE_KEYS: &[&str] = &[
    "sanctum", "let", "set", "var", "env", "sleep", "kill", "proclaim", "fail", "tunnel", "hoard",
    "config", "ask", "choose",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdictKind {
    PostRun,
    OnHeresy,
    OnUndo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetryBackoff {
    #[default]
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: RetryBackoff,
    pub interval_secs: u64,
}

/// A single Symphony statement: Action, Vow, or State change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Edict {
    Action {
        kind: EdictKind,
        command: String,
        capture_var: Option<String>,
        strategy: Option<String>,
        retry: Option<RetryPolicy>,
        allow_fail: bool,
    },
    Vow {
        kind: EdictKind,
        assertion: String,
        args: Vec<String>,
    },
    State {
        kind: EdictKind,
        key: String,
        value: String,
    },
}

/// Parse a `%% post-run:` / `%% on-heresy:` / `%% on-undo:` header and its
/// indented block of Symphony lines.
pub fn parse_state_block(
    lines: &[&str],
    idx: usize,
    indent: usize,
) -> Result<(Vec<Edict>, usize), RiteError> {
    let raw = lines[idx];
    let trimmed = raw.trim_start();
    let line_num = idx + 1;

    let edict_kind = if trimmed.starts_with("%% post-run") {
        EdictKind::PostRun
    } else if trimmed.starts_with("%% on-heresy") {
        EdictKind::OnHeresy
    } else if trimmed.starts_with("%% on-undo") {
        EdictKind::OnUndo
    } else {
        return Err(RiteError::ParseHeresy {
            line: line_num,
            col: indent + 1,
            detail: format!("unrecognized state-block header '{trimmed}'"),
        });
    };

    let (block, consumed) = consume_block_owned(lines, idx + 1, indent);
    let mut edicts = Vec::new();
    for (offset, raw_line) in block.iter().enumerate() {
        let body = raw_line.trim();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        edicts.push(parse_symphony_line(body, edict_kind, line_num + 1 + offset)?);
    }
    Ok((edicts, 1 + consumed))
}

fn parse_symphony_line(body: &str, kind: EdictKind, line_num: usize) -> Result<Edict, RiteError> {
    if let Some(rest) = body.strip_prefix(">>") {
        return parse_action(rest.trim(), kind, line_num);
    }
    if let Some(rest) = body.strip_prefix("??") {
        return parse_vow(rest.trim(), kind, line_num);
    }
    if let Some(rest) = body.strip_prefix("%%") {
        return parse_state(rest.trim(), kind, line_num);
    }
    Err(RiteError::ParseHeresy {
        line: line_num,
        col: 1,
        detail: format!("unrecognized symphony line '{body}'"),
    })
}

fn parse_action(rest: &str, kind: EdictKind, line_num: usize) -> Result<Edict, RiteError> {
    let (allow_fail, rest) = match rest.strip_prefix("allow_fail:") {
        Some(r) => (true, r.trim()),
        None => (false, rest),
    };

    let mut command = rest.to_string();
    let mut capture_var = None;
    let mut strategy = None;
    let mut retry = None;

    if let Some(pos) = find_suffix(&command, " retry(") {
        let (head, tail) = command.split_at(pos);
        let close = tail.rfind(')').ok_or_else(|| RiteError::ParseHeresy {
            line: line_num,
            col: 1,
            detail: "unterminated retry(...) suffix".to_string(),
        })?;
        retry = Some(parse_retry(&tail[" retry(".len()..close], line_num)?);
        command = head.to_string();
    }
    if let Some(pos) = find_suffix(&command, " using ") {
        let (head, tail) = command.split_at(pos);
        strategy = Some(tail[" using ".len()..].trim().to_string());
        command = head.to_string();
    }
    if let Some(pos) = find_suffix(&command, " as ") {
        let (head, tail) = command.split_at(pos);
        capture_var = Some(tail[" as ".len()..].trim().to_string());
        command = head.to_string();
    }

    Ok(Edict::Action {
        kind,
        command: command.trim().to_string(),
        capture_var,
        strategy,
        retry,
        allow_fail,
    })
}

fn parse_retry(args: &str, line_num: usize) -> Result<RetryPolicy, RiteError> {
    let mut policy = RetryPolicy {
        attempts: 1,
        backoff: RetryBackoff::Linear,
        interval_secs: 1,
    };
    for (i, part) in args.split(',').enumerate() {
        let part = part.trim();
        if i == 0 && !part.contains('=') {
            policy.attempts = part.parse().map_err(|_| RiteError::ParseHeresy {
                line: line_num,
                col: 1,
                detail: format!("invalid retry attempt count '{part}'"),
            })?;
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            match key.trim() {
                "backoff" => {
                    policy.backoff = match value.trim() {
                        "linear" => RetryBackoff::Linear,
                        "exponential" => RetryBackoff::Exponential,
                        other => {
                            return Err(RiteError::ParseHeresy {
                                line: line_num,
                                col: 1,
                                detail: format!("unknown backoff strategy '{other}'"),
                            })
                        }
                    }
                }
                "interval" => {
                    policy.interval_secs = value.trim().parse().map_err(|_| RiteError::ParseHeresy {
                        line: line_num,
                        col: 1,
                        detail: format!("invalid retry interval '{value}'"),
                    })?;
                }
                other => {
                    return Err(RiteError::ParseHeresy {
                        line: line_num,
                        col: 1,
                        detail: format!("unknown retry parameter '{other}'"),
                    })
                }
            }
        }
    }
    Ok(policy)
}

fn parse_vow(rest: &str, kind: EdictKind, line_num: usize) -> Result<Edict, RiteError> {
    let (assertion, args_str) = rest.split_once(':').ok_or_else(|| RiteError::ParseHeresy {
        line: line_num,
        col: 1,
        detail: format!("vow '{rest}' requires 'kind: args'"),
    })?;
    let args = split_args(args_str.trim());
    Ok(Edict::Vow {
        kind,
        assertion: assertion.trim().to_string(),
        args,
    })
}

fn parse_state(rest: &str, kind: EdictKind, line_num: usize) -> Result<Edict, RiteError> {
    let (key, value) = rest.split_once(':').ok_or_else(|| RiteError::ParseHeresy {
        line: line_num,
        col: 1,
        detail: format!("state change '{rest}' requires 'key: value'"),
    })?;
    let key = key.trim().to_string();
    if !KNOWN_STATE_KEYS.contains(&key.as_str()) {
        return Err(RiteError::ParseHeresy {
            line: line_num,
            col: 1,
            detail: format!("unknown state key '{key}' (UnknownStateHeresy)"),
        });
    }
    Ok(Edict::State {
        kind,
        key,
        value: value.trim().to_string(),
    })
}

/// Find the byte offset of a literal suffix marker, honoring quoted
/// strings so e.g. `as` inside a quoted command argument isn't mistaken
/// for the capture-variable suffix.
fn find_suffix(s: &str, marker: &str) -> Option<usize> {
    let mut in_single = false;
    let mut in_double = false;
    let bytes = s.as_bytes();
    let mlen = marker.len();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] as char {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }
        if !in_single && !in_double && i + mlen <= s.len() && &s[i..i + mlen] == marker {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    for ch in s.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ',' if !in_single && !in_double => {
                args.push(current.trim().trim_matches('"').trim_matches('\'').to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        args.push(current.trim().trim_matches('"').trim_matches('\'').to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_action() {
        let (edicts, consumed) = parse_state_block(&["%% post-run:", "  >> npm install"], 0, 0).unwrap();
        assert_eq!(consumed, 2);
        match &edicts[0] {
            Edict::Action { command, .. } => assert_eq!(command, "npm install"),
            _ => panic!("expected Action"),
        }
    }

    #[test]
    fn parses_action_with_capture_and_retry() {
        let (edicts, _) = parse_state_block(
            &["%% post-run:", "  >> curl -s http://x as body retry(3, backoff=exponential, interval=2)"],
            0,
            0,
        )
        .unwrap();
        match &edicts[0] {
            Edict::Action { command, capture_var, retry, .. } => {
                assert_eq!(command, "curl -s http://x");
                assert_eq!(capture_var.as_deref(), Some("body"));
                let retry = retry.as_ref().unwrap();
                assert_eq!(retry.attempts, 3);
                assert_eq!(retry.backoff, RetryBackoff::Exponential);
                assert_eq!(retry.interval_secs, 2);
            }
            _ => panic!("expected Action"),
        }
    }

    #[test]
    fn parses_vow() {
        let (edicts, _) =
            parse_state_block(&["%% post-run:", "  ?? stdout_contains: body, \"ok\""], 0, 0).unwrap();
        match &edicts[0] {
            Edict::Vow { assertion, args, .. } => {
                assert_eq!(assertion, "stdout_contains");
                assert_eq!(args, &vec!["body".to_string(), "ok".to_string()]);
            }
            _ => panic!("expected Vow"),
        }
    }

    #[test]
    fn parses_state_change() {
        let (edicts, _) = parse_state_block(&["%% post-run:", "  %% sleep: 2"], 0, 0).unwrap();
        match &edicts[0] {
            Edict::State { key, value, .. } => {
                assert_eq!(key, "sleep");
                assert_eq!(value, "2");
            }
            _ => panic!("expected State"),
        }
    }

    #[test]
    fn unknown_state_key_fails() {
        let err = parse_state_block(&["%% post-run:", "  %% bogus: 1"], 0, 0).unwrap_err();
        assert!(matches!(err, RiteError::ParseHeresy { .. }));
    }
}
