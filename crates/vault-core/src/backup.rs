//! Pre-write backup snapshots and retention
//!
//! Before a record is overwritten, its current bytes are copied to
//! `<file name>.backup.<yyyyMMddHHmmss>` in the same directory, and the
//! backup set is pruned to the newest `max_backups`. Snapshot and prune
//! failures are logged and swallowed: a lost backup must never block new
//! data from being durably written. Restore is the opposite — it refuses to
//! copy a backup that does not parse.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::atomic;
use crate::error::{Result, StorageOp, VaultError};
use crate::perms;

/// Collaborator contract bound on `max_backups`
pub const MAX_BACKUPS_LIMIT: usize = 100;

/// Timestamp layout used in backup file names
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Snapshot `target` before it is overwritten.
///
/// Returns the backup path, or `None` when the target does not exist yet,
/// `max_backups` is zero, or the snapshot failed (logged, non-fatal).
pub fn snapshot_before_write(target: &Path, max_backups: usize) -> Option<PathBuf> {
    if !target.exists() {
        return None;
    }
    let max_backups = max_backups.min(MAX_BACKUPS_LIMIT);
    if max_backups == 0 {
        return None;
    }

    let stamp = Utc::now().format(STAMP_FORMAT);
    let Some(name) = target.file_name() else {
        return None;
    };
    let backup_name = format!("{}.backup.{}", name.to_string_lossy(), stamp);
    let backup_path = target.with_file_name(backup_name);

    match std::fs::copy(target, &backup_path) {
        Ok(_) => {
            if let Err(error) = perms::restrict_file(&backup_path) {
                warn!(path = %backup_path.display(), %error, "could not harden backup permissions");
            }
            prune(target, max_backups);
            Some(backup_path)
        }
        Err(error) => {
            warn!(path = %target.display(), %error, "backup snapshot failed; continuing with write");
            None
        }
    }
}

/// All backups of `target`, newest first.
///
/// The embedded timestamp is fixed-width, so name order is creation order.
pub fn list_backups(target: &Path) -> Vec<PathBuf> {
    let Some(name) = target.file_name() else {
        return Vec::new();
    };
    let prefix = format!("{}.backup.", name.to_string_lossy());
    let Some(parent) = target.parent() else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(&prefix))
                .is_some_and(|stamp| stamp.len() == 14 && stamp.bytes().all(|b| b.is_ascii_digit()))
        })
        .collect();
    backups.sort();
    backups.reverse();
    backups
}

/// Restore `backup` over `target`.
///
/// The backup must parse as a payload; a corrupt backup is an error and the
/// target is left untouched. The copy goes through the atomic writer.
pub fn restore(backup: &Path, target: &Path) -> Result<()> {
    let bytes = std::fs::read(backup)
        .map_err(|e| VaultError::storage(StorageOp::Restore, backup, e))?;
    serde_json::from_slice::<Value>(&bytes)
        .map_err(|e| VaultError::storage(StorageOp::Restore, backup, e))?;
    atomic::write(target, &bytes)
}

/// Delete everything beyond the `max_backups` newest snapshots
fn prune(target: &Path, max_backups: usize) {
    for extra in list_backups(target).split_off(max_backups) {
        if let Err(error) = std::fs::remove_file(&extra) {
            warn!(path = %extra.display(), %error, "could not prune old backup");
        }
    }
}
