//! The Sanctum interface: abstracts read/write/delete/chmod over local
//! disk or memory, per spec §6.3. A network-capable Sanctum (S3, SSH) is
//! named by the interface but not implemented by this crate.

use crate::core::error::RiteError;
use rustc_hash::FxHashMap;
use std::fs;
use std::os::unix::fs::{symlink as unix_symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Metadata returned by [`Sanctum::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
}

/// Abstracts filesystem-shaped I/O so the core never calls `std::fs`
/// directly outside this module and its local implementation.
pub trait Sanctum: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn read_text(&self, path: &Path) -> Result<String, RiteError>;
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, RiteError>;
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), RiteError>;
    fn delete(&self, path: &Path, recursive: bool) -> Result<(), RiteError>;
    fn mkdir(&self, path: &Path) -> Result<(), RiteError>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<(), RiteError>;
    fn symlink(&self, link: &Path, target: &Path) -> Result<(), RiteError>;
    fn stat(&self, path: &Path) -> Result<Stat, RiteError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), RiteError>;
}

/// Local-disk Sanctum. The default for real rites.
#[derive(Debug, Default)]
pub struct LocalSanctum;

impl LocalSanctum {
    pub fn new() -> Self {
        Self
    }
}

impl Sanctum for LocalSanctum {
    fn exists(&self, path: &Path) -> bool {
        path.exists() || path.symlink_metadata().is_ok()
    }

    fn read_text(&self, path: &Path) -> Result<String, RiteError> {
        Ok(fs::read_to_string(path)?)
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, RiteError> {
        Ok(fs::read(path)?)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), RiteError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::write(path, bytes)?)
    }

    fn delete(&self, path: &Path, recursive: bool) -> Result<(), RiteError> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_dir(path)?;
            }
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &Path) -> Result<(), RiteError> {
        Ok(fs::create_dir_all(path)?)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), RiteError> {
        Ok(fs::set_permissions(path, fs::Permissions::from_mode(mode))?)
    }

    fn symlink(&self, link: &Path, target: &Path) -> Result<(), RiteError> {
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(unix_symlink(target, link)?)
    }

    fn stat(&self, path: &Path) -> Result<Stat, RiteError> {
        let meta = fs::metadata(path)?;
        Ok(Stat {
            size: meta.len(),
            mode: meta.permissions().mode(),
            mtime: meta.mtime(),
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RiteError> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::rename(from, to)?)
    }
}

/// In-memory Sanctum used by tests and dry-run planning harnesses that
/// want no filesystem side effects at all.
#[derive(Debug, Default)]
pub struct MemorySanctum {
    files: Mutex<FxHashMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<FxHashMap<PathBuf, ()>>,
    modes: Mutex<FxHashMap<PathBuf, u32>>,
}

impl MemorySanctum {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sanctum for MemorySanctum {
    fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains_key(path)
    }

    fn read_text(&self, path: &Path) -> Result<String, RiteError> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| RiteError::Validation(e.to_string()))
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, RiteError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| RiteError::NotFound(path.display().to_string()))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), RiteError> {
        self.files.lock().unwrap().insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, path: &Path, recursive: bool) -> Result<(), RiteError> {
        let mut files = self.files.lock().unwrap();
        if files.remove(path).is_some() {
            return Ok(());
        }
        let mut dirs = self.dirs.lock().unwrap();
        if dirs.remove(path).is_some() {
            if !recursive {
                let has_children = files.keys().any(|p| p.starts_with(path));
                if has_children {
                    return Err(RiteError::Validation(format!(
                        "directory '{}' is not empty",
                        path.display()
                    )));
                }
            } else {
                files.retain(|p, _| !p.starts_with(path));
            }
            return Ok(());
        }
        Err(RiteError::NotFound(path.display().to_string()))
    }

    fn mkdir(&self, path: &Path) -> Result<(), RiteError> {
        self.dirs.lock().unwrap().insert(path.to_path_buf(), ());
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), RiteError> {
        self.modes.lock().unwrap().insert(path.to_path_buf(), mode);
        Ok(())
    }

    fn symlink(&self, link: &Path, target: &Path) -> Result<(), RiteError> {
        self.files
            .lock()
            .unwrap()
            .insert(link.to_path_buf(), target.to_string_lossy().into_owned().into_bytes());
        Ok(())
    }

    fn stat(&self, path: &Path) -> Result<Stat, RiteError> {
        let size = self.files.lock().unwrap().get(path).map(|b| b.len() as u64).unwrap_or(0);
        let mode = self.modes.lock().unwrap().get(path).copied().unwrap_or(0o644);
        Ok(Stat { size, mode, mtime: 0 })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), RiteError> {
        let bytes = self.read_bytes(from)?;
        self.files.lock().unwrap().remove(from);
        self.write(to, &bytes)
    }
}
