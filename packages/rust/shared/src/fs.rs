//! Byte storage abstraction.
//!
//! The pipelines read templates and write outputs through [`FileStore`]
//! rather than touching `std::fs` directly, so tests and alternative
//! backends can swap the implementation at the seam.

use std::path::{Path, PathBuf};

use crate::error::{DocforgeError, Result};

/// Narrow byte-storage contract used by ingestion and generation.
pub trait FileStore: Send + Sync {
    /// Read a file's full content.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write bytes, creating parent directories as needed.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// List all regular files under `prefix`, recursively, sorted by path.
    /// A missing prefix yields an empty list.
    fn list_files(&self, prefix: &Path) -> Result<Vec<PathBuf>>;

    /// Create a directory (and parents) if it does not exist.
    fn ensure_dir(&self, path: &Path) -> Result<()>;
}

/// Local-filesystem implementation of [`FileStore`].
#[derive(Debug, Clone, Default)]
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| DocforgeError::io(path, e))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocforgeError::io(parent, e))?;
        }
        std::fs::write(path, data).map_err(|e| DocforgeError::io(path, e))
    }

    fn list_files(&self, prefix: &Path) -> Result<Vec<PathBuf>> {
        if !prefix.exists() {
            return Ok(vec![]);
        }
        let mut files = Vec::new();
        collect_files(prefix, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn ensure_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| DocforgeError::io(path, e))
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| DocforgeError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DocforgeError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("df_fs_{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn write_read_roundtrip_creates_parents() {
        let root = temp_root();
        let store = LocalFileStore;
        let nested = root.join("a/b/c.bin");

        store.write(&nested, b"payload").expect("write");
        let data = store.read(&nested).expect("read");
        assert_eq!(data, b"payload");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn list_files_is_sorted_and_recursive() {
        let root = temp_root();
        let store = LocalFileStore;
        store.write(&root.join("z.txt"), b"z").unwrap();
        store.write(&root.join("sub/a.txt"), b"a").unwrap();
        store.write(&root.join("m.txt"), b"m").unwrap();

        let files = store.list_files(&root).expect("list");
        assert_eq!(files.len(), 3);
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_prefix_lists_empty() {
        let store = LocalFileStore;
        let files = store
            .list_files(&temp_root().join("does-not-exist"))
            .expect("list");
        assert!(files.is_empty());
    }
}
