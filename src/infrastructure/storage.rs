//! External storage
//!
//! The record file and the reference transcript live on a store rooted at a
//! single directory (the "external storage" of the host). Paths handed to
//! the store are relative to that root; `""` names the root itself.

use crate::error::StorageError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait ExternalStorage: Send + Sync {
    /// Whether the store is mounted and usable
    fn is_available(&self) -> bool;

    /// File names (not directories) directly inside `dir`, sorted
    fn list_files(&self, dir: &str) -> Result<Vec<String>, StorageError>;

    /// Full contents of `dir/name`, decoded as UTF-8 (lossy)
    fn read_to_string(&self, dir: &str, name: &str) -> Result<String, StorageError>;

    /// Append `bytes` to the file `name` at the root, creating it if needed
    fn append(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Store backed by a local directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, dir: &str) -> PathBuf {
        if dir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(dir)
        }
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(self.root.display().to_string()))
        }
    }
}

impl ExternalStorage for FsStorage {
    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_available()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(dir))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_to_string(&self, dir: &str, name: &str) -> Result<String, StorageError> {
        self.ensure_available()?;
        let bytes = fs::read(self.resolve(dir).join(name))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn append(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.ensure_available()?;
        let path = self.root.join(name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(bytes)?;
        file.flush()?;
        debug!("Appended {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_accumulates() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.append("log.txt", b"first\n").unwrap();
        storage.append("log.txt", b"second\n").unwrap();

        let content = fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_list_files_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("Downloads")).unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();

        let storage = FsStorage::new(dir.path());
        assert_eq!(storage.list_files("").unwrap(), vec!["a.txt", "b.txt"]);
        assert!(storage.list_files("Downloads").unwrap().is_empty());
        assert!(storage.list_files("Missing").is_err());
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path().join("not-mounted"));

        assert!(!storage.is_available());
        assert!(matches!(
            storage.append("log.txt", b"x"),
            Err(StorageError::Unavailable(_))
        ));
    }
}
