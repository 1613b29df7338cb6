//! Atomic file writes
//!
//! Temp file + fsync + verified atomic replace. The temp file is created in
//! the target's own directory so the final replace never crosses a
//! filesystem boundary; the replace itself is the platform's single-step
//! primitive (rename(2) on Unix, `MoveFileEx` with replace on Windows), so a
//! reader observes either the previous complete content or the new complete
//! content, never a mix.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, StorageOp, VaultError};

/// Write `bytes` to `path` atomically.
///
/// The written bytes are read back and compared before the replace; a
/// mismatch aborts with [`VaultError::ContentVerification`] and leaves the
/// target untouched. The temp file is removed on every failure path.
pub fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(&parent)
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e))?;

    let mut temp = NamedTempFile::new_in(&parent)
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e))?;
    temp.write_all(bytes)
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e))?;
    temp.flush()
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e))?;

    // Verify before the replace: the target must never receive bytes that
    // did not survive the round trip to disk.
    let readback = std::fs::read(temp.path())
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e))?;
    if readback != bytes {
        // temp is dropped here, deleting the file
        return Err(VaultError::ContentVerification {
            path: path.to_path_buf(),
        });
    }

    temp.persist(path)
        .map_err(|e| VaultError::storage(StorageOp::Write, path, e.error))?;
    Ok(())
}

/// The directory the temp file must live in: the target's parent, or the
/// current directory for bare file names
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_round_trips() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("state.json");

        write(&target, b"{\"n\": 1}")?;

        assert_eq!(std::fs::read(&target)?, b"{\"n\": 1}");
        Ok(())
    }

    #[test]
    fn test_write_creates_missing_parents() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("a/b/c/state.json");

        write(&target, b"{}")?;

        assert!(target.exists());
        Ok(())
    }

    #[test]
    fn test_replace_swaps_complete_content() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("state.json");
        std::fs::write(&target, "old content, longer than the new one")?;

        write(&target, b"new")?;

        assert_eq!(std::fs::read_to_string(&target)?, "new");
        Ok(())
    }

    #[test]
    fn test_no_temp_files_left_behind() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("state.json");

        write(&target, b"{}")?;
        write(&target, b"{\"n\": 2}")?;

        let entries: Vec<_> = std::fs::read_dir(dir.path())?
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
        Ok(())
    }

    #[test]
    fn test_double_write_is_idempotent() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("state.json");

        write(&target, b"{\"n\": 1}")?;
        let first = std::fs::read(&target)?;
        write(&target, b"{\"n\": 1}")?;
        let second = std::fs::read(&target)?;

        assert_eq!(first, second);
        Ok(())
    }
}
