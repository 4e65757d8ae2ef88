//! Leading-token line classification. Spec §4.3 "Line classification".

/// What a blueprint line turned out to be, based on its leading token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Variable,
    Logic,
    Include,
    Diagnostic,
    Trait,
    Contract,
    Symphony,
    Form,
    Unknown(String),
}

/// Gnostic barrier tokens: lines that start a new construct and therefore
/// terminate any open indented block regardless of indent depth.
pub fn is_gnostic_barrier(trimmed: &str) -> bool {
    trimmed.starts_with('@') || trimmed.starts_with("$$") || trimmed.starts_with("%%")
}

pub fn classify(trimmed: &str) -> LineKind {
    if trimmed.starts_with("$$") {
        return LineKind::Variable;
    }
    if trimmed.starts_with("@if")
        || trimmed.starts_with("@elif")
        || trimmed.starts_with("@else")
        || trimmed.starts_with("@endif")
        || trimmed.starts_with("@def")
    {
        return LineKind::Logic;
    }
    if trimmed.starts_with("@include") {
        return LineKind::Include;
    }
    if trimmed.starts_with("@error") || trimmed.starts_with("@warn") || trimmed.starts_with("@print") {
        return LineKind::Diagnostic;
    }
    if trimmed.starts_with("@") {
        let token = trimmed.split_whitespace().next().unwrap_or(trimmed).to_string();
        return LineKind::Unknown(token);
    }
    if trimmed.starts_with("%% trait") || trimmed.starts_with("%% use") {
        return LineKind::Trait;
    }
    if trimmed.starts_with("%% contract") {
        return LineKind::Contract;
    }
    if trimmed.starts_with("%% post-run")
        || trimmed.starts_with("%% on-heresy")
        || trimmed.starts_with("%% on-undo")
    {
        return LineKind::Symphony;
    }
    if trimmed.starts_with("%%") {
        let token = trimmed.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        return LineKind::Unknown(token);
    }
    LineKind::Form
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_variable() {
        assert_eq!(classify("$$name = \"x\""), LineKind::Variable);
    }

    #[test]
    fn classifies_form_by_default() {
        assert_eq!(classify("src/main.rs :: \"fn main() {}\""), LineKind::Form);
    }

    #[test]
    fn classifies_unknown_at_directive() {
        assert_eq!(classify("@wat"), LineKind::Unknown("@wat".to_string()));
    }

    #[test]
    fn gnostic_barrier_detection() {
        assert!(is_gnostic_barrier("@if true"));
        assert!(is_gnostic_barrier("$$x = 1"));
        assert!(is_gnostic_barrier("%% trait Foo = bar"));
        assert!(!is_gnostic_barrier("src/main.rs"));
    }
}
