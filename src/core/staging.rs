//! Staging Manager: the per-transaction tree that mirrors the project root
//! while a rite is in flight, plus the advisory lock that serializes rites
//! against one project root. Spec §4.5 step 1 ("Begin").

use crate::core::error::RiteError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An acquired advisory lock at `.scaffold/lock`. Dropping it removes the
/// lock file, releasing the next waiter.
pub struct AdvisoryLock {
    path: PathBuf,
}

impl AdvisoryLock {
    /// Acquire the lock, blocking (with polling) up to `timeout`.
    /// Timing out raises `ConcurrentRiteHeresy`.
    pub fn acquire(project_root: &Path, timeout: Duration) -> Result<Self, RiteError> {
        let scaffold_dir = project_root.join(".scaffold");
        fs::create_dir_all(&scaffold_dir)?;
        let lock_path = scaffold_dir.join("lock");
        let start = Instant::now();

        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => return Ok(Self { path: lock_path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= timeout {
                        return Err(RiteError::ConcurrentRite {
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(RiteError::Io(e)),
            }
        }
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The staging tree for one transaction: `.scaffold/staging/<tx_id>/`.
pub struct StagingTree {
    pub tx_id: String,
    pub root: PathBuf,
    pub project_root: PathBuf,
}

impl StagingTree {
    pub fn begin(project_root: &Path, tx_id: &str) -> Result<Self, RiteError> {
        let root = project_root.join(".scaffold/staging").join(tx_id);
        fs::create_dir_all(&root)?;
        Ok(Self {
            tx_id: tx_id.to_string(),
            root,
            project_root: project_root.to_path_buf(),
        })
    }

    pub fn staging_path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn project_path(&self, relative: &Path) -> PathBuf {
        self.project_root.join(relative)
    }

    /// Ensure `relative`'s current bytes are present in staging, copying
    /// from the project root if this is the first mutation touching it.
    pub fn materialize_prior(&self, relative: &Path) -> Result<Option<Vec<u8>>, RiteError> {
        let staged = self.staging_path(relative);
        if staged.exists() {
            return Ok(Some(fs::read(&staged)?));
        }
        let original = self.project_path(relative);
        if !original.exists() {
            return Ok(None);
        }
        let content = fs::read(&original)?;
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&staged, &content)?;
        Ok(Some(content))
    }

    /// Discard the staging tree entirely (abort, or after a successful
    /// dry-run Prophecy).
    pub fn discard(&self) -> Result<(), RiteError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn begin_creates_staging_directory() {
        let dir = tempdir().unwrap();
        let staging = StagingTree::begin(dir.path(), "tx1").unwrap();
        assert!(staging.root.exists());
        assert!(staging.root.ends_with("tx1"));
    }

    #[test]
    fn materialize_prior_copies_from_project_root_once() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"original").unwrap();
        let staging = StagingTree::begin(dir.path(), "tx1").unwrap();

        let content = staging.materialize_prior(Path::new("a.txt")).unwrap();
        assert_eq!(content, Some(b"original".to_vec()));
        assert!(staging.staging_path(Path::new("a.txt")).exists());
    }

    #[test]
    fn materialize_prior_returns_none_for_new_file() {
        let dir = tempdir().unwrap();
        let staging = StagingTree::begin(dir.path(), "tx1").unwrap();
        let content = staging.materialize_prior(Path::new("new.txt")).unwrap();
        assert_eq!(content, None);
    }

    #[test]
    fn discard_removes_staging_tree() {
        let dir = tempdir().unwrap();
        let staging = StagingTree::begin(dir.path(), "tx1").unwrap();
        staging.discard().unwrap();
        assert!(!staging.root.exists());
    }

    #[test]
    fn advisory_lock_blocks_second_acquirer_until_dropped() {
        let dir = tempdir().unwrap();
        let lock = AdvisoryLock::acquire(dir.path(), Duration::from_secs(1)).unwrap();
        let err = AdvisoryLock::acquire(dir.path(), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, RiteError::ConcurrentRite { .. }));
        drop(lock);
        assert!(AdvisoryLock::acquire(dir.path(), Duration::from_secs(1)).is_ok());
    }
}
