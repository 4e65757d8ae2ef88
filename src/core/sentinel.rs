//! Path Sentinel: rejects profane, escaping, or case-colliding paths before
//! anything is staged or written.
//!
//! Grounded on the traversal guard in
//! `examples/DecapodLabs-decapod/src/core/fs_cli.rs`
//! (`if !target_path.starts_with(project_root) { ... }`), generalized into a
//! standalone adjudication contract per spec §4.1.

use crate::core::error::RiteError;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

const FORBIDDEN_CHARS: &[char] = &['<', '>', '|', '?', '*'];
const FORBIDDEN_SEGMENTS: &[&str] = &["..", ".git"];

const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Tracks the lowercase form of every path adjudicated so far within one
/// rite, so later arrivals can be checked for case-collision against
/// siblings already accepted into the plan.
#[derive(Debug, Default)]
pub struct PathSentinel {
    seen_lower: FxHashMap<String, PathBuf>,
}

impl PathSentinel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the collision set from paths that already exist on disk (the
    /// project root), so a newly planned path can't case-collide with
    /// something the blueprint didn't create.
    pub fn seed_existing(&mut self, root: &Path) -> Result<(), RiteError> {
        if !root.exists() {
            return Ok(());
        }
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                if rel.as_os_str().is_empty() {
                    continue;
                }
                let key = rel.to_string_lossy().to_lowercase();
                self.seen_lower.entry(key).or_insert_with(|| rel.to_path_buf());
            }
        }
        Ok(())
    }

    /// Adjudicate a raw, possibly-templated path string against the project
    /// root. Returns the normalized relative path on success.
    pub fn adjudicate(&mut self, path_string: &str, project_root: &Path) -> Result<PathBuf, RiteError> {
        if path_string.is_empty() {
            return Err(RiteError::PathHeresy {
                path: path_string.to_string(),
                reason: "empty path".to_string(),
            });
        }

        for ch in path_string.chars() {
            if (ch as u32) < 0x20 || FORBIDDEN_CHARS.contains(&ch) {
                return Err(RiteError::PathHeresy {
                    path: path_string.to_string(),
                    reason: format!("forbidden character {:?}", ch),
                });
            }
        }

        let normalized = path_string.replace('\\', "/");
        let normalized = normalized.trim_start_matches('/');

        let mut clean_segments: Vec<&str> = Vec::new();
        for segment in normalized.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if FORBIDDEN_SEGMENTS.contains(&segment) {
                return Err(RiteError::PathHeresy {
                    path: path_string.to_string(),
                    reason: format!("forbidden segment '{segment}'"),
                });
            }
            let bare = segment.split('.').next().unwrap_or(segment);
            if RESERVED_WINDOWS_NAMES.contains(&bare.to_uppercase().as_str()) {
                return Err(RiteError::PathHeresy {
                    path: path_string.to_string(),
                    reason: format!("reserved device name '{segment}'"),
                });
            }
            clean_segments.push(segment);
        }

        if clean_segments.is_empty() {
            return Err(RiteError::PathHeresy {
                path: path_string.to_string(),
                reason: "path resolves to project root".to_string(),
            });
        }

        let relative: PathBuf = clean_segments.iter().collect();
        let resolved = project_root.join(&relative);
        let resolved_clean = lexical_normalize(&resolved);
        let root_clean = lexical_normalize(project_root);
        if !resolved_clean.starts_with(&root_clean) {
            return Err(RiteError::PathHeresy {
                path: path_string.to_string(),
                reason: "escapes project root".to_string(),
            });
        }

        let key = relative.to_string_lossy().to_lowercase();
        if let Some(existing) = self.seen_lower.get(&key) {
            if existing != &relative {
                return Err(RiteError::PathHeresy {
                    path: path_string.to_string(),
                    reason: format!(
                        "case-collision with already-planned path '{}'",
                        existing.display()
                    ),
                });
            }
        } else {
            self.seen_lower.insert(key, relative.clone());
        }

        Ok(relative)
    }
}

/// Collapse `.`/`..` components lexically without touching the filesystem
/// (the Sentinel must reject traversal even against paths that don't exist
/// yet, so it can't rely on `fs::canonicalize`).
fn lexical_normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        let err = sentinel.adjudicate("../etc/passwd", &root).unwrap_err();
        assert!(matches!(err, RiteError::PathHeresy { .. }));
    }

    #[test]
    fn rejects_dotgit_segment() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        let err = sentinel.adjudicate("src/.git/hooks", &root).unwrap_err();
        assert!(matches!(err, RiteError::PathHeresy { .. }));
    }

    #[test]
    fn rejects_reserved_device_name() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        let err = sentinel.adjudicate("src/CON.txt", &root).unwrap_err();
        assert!(matches!(err, RiteError::PathHeresy { .. }));
    }

    #[test]
    fn accepts_normal_relative_path() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        let resolved = sentinel.adjudicate("src/main.rs", &root).unwrap();
        assert_eq!(resolved, PathBuf::from("src/main.rs"));
    }

    #[test]
    fn detects_case_collision_within_plan() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        sentinel.adjudicate("src/Main.rs", &root).unwrap();
        let err = sentinel.adjudicate("src/main.rs", &root).unwrap_err();
        assert!(matches!(err, RiteError::PathHeresy { .. }));
    }

    #[test]
    fn same_path_twice_is_not_a_collision() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        sentinel.adjudicate("src/main.rs", &root).unwrap();
        assert!(sentinel.adjudicate("src/main.rs", &root).is_ok());
    }

    #[test]
    fn strips_leading_slash() {
        let mut sentinel = PathSentinel::new();
        let root = PathBuf::from("/project");
        let resolved = sentinel.adjudicate("/src/main.rs", &root).unwrap();
        assert_eq!(resolved, PathBuf::from("src/main.rs"));
    }
}
