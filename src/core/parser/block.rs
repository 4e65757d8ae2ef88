//! Indented-block consumption shared by Form, Variable, Trait, Contract and
//! Symphony state-block parsing. Spec §4.3 "Block termination rules".

use super::lexer::is_gnostic_barrier;

/// Consume the indented block that follows a header line at `opening_indent`.
///
/// A block ends at the first line whose indent is `<= opening_indent` and
/// which is not blank/comment, or at any Gnostic barrier line regardless of
/// indent. Returns the raw (not yet dedented) block lines and how many
/// source lines were consumed (header excluded).
pub fn consume_block_owned(lines: &[&str], start: usize, opening_indent: usize) -> (Vec<String>, usize) {
    let mut collected = Vec::new();
    let mut idx = start;
    while idx < lines.len() {
        let raw = lines[idx];
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            collected.push(raw.to_string());
            idx += 1;
            continue;
        }
        let indent = raw.len() - trimmed.len();
        if is_gnostic_barrier(trimmed) || indent <= opening_indent {
            break;
        }
        collected.push(raw.to_string());
        idx += 1;
    }
    (collected, idx - start)
}

/// Dedent a block of raw lines to its minimum indentation, dropping blank
/// lines from the minimum-indent computation.
pub fn dedent(block: &[String]) -> String {
    let min_indent = block
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    block
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else if l.len() >= min_indent {
                l[min_indent..].to_string()
            } else {
                l.trim_start().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_stops_at_dedent() {
        let lines = vec!["  line one", "  line two", "next"];
        let (block, consumed) = consume_block_owned(&lines, 0, 0);
        assert_eq!(consumed, 2);
        assert_eq!(block, vec!["  line one".to_string(), "  line two".to_string()]);
    }

    #[test]
    fn consume_stops_at_gnostic_barrier() {
        let lines = vec!["  echo hi", "$$x = 1"];
        let (block, consumed) = consume_block_owned(&lines, 0, 0);
        assert_eq!(consumed, 1);
        assert_eq!(block, vec!["  echo hi".to_string()]);
    }

    #[test]
    fn dedent_strips_common_prefix() {
        let block = vec!["    a".to_string(), "    b".to_string(), "".to_string()];
        assert_eq!(dedent(&block), "a\nb\n");
    }
}
