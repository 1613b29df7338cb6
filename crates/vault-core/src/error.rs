//! Error types for the vault core
//!
//! One closed error enum covers every failure the core can surface. Each
//! variant carries the fields a caller needs to react: the offending path,
//! the storage operation that failed, and the underlying cause. We use
//! `thiserror` for ergonomic definitions with automatic Display/Error
//! implementations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Storage operation attached to a [`VaultError::Storage`] for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    /// Reading the primary file
    Read,
    /// Writing the primary file
    Write,
    /// Serializing a payload before writing
    Serialize,
    /// Deserializing file content into a payload
    Deserialize,
    /// Creating a pre-write backup snapshot
    Backup,
    /// Restoring a backup over the primary file
    Restore,
    /// Deleting a record and its backups
    Delete,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageOp::Read => "read",
            StorageOp::Write => "write",
            StorageOp::Serialize => "serialize",
            StorageOp::Deserialize => "deserialize",
            StorageOp::Backup => "backup",
            StorageOp::Restore => "restore",
            StorageOp::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// Underlying cause of a storage failure (closed set)
#[derive(Debug, Error)]
pub enum StorageCause {
    /// Filesystem-level failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Main error type for vault operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// The path failed validation. Always fatal to the calling operation:
    /// unsafe or ambiguous paths are never written to or read from.
    #[error("path rejected: {reason} ('{}')", .path.display())]
    PathValidation {
        /// The path as supplied by the caller
        path: PathBuf,
        /// Why validation rejected it
        reason: String,
    },

    /// The lock could not be acquired within the caller's deadline
    #[error("could not acquire lock on '{}' within {waited_ms} ms", .path.display())]
    LockTimeout {
        /// The lock file path
        path: PathBuf,
        /// How long the caller waited before giving up
        waited_ms: u64,
    },

    /// A read or write against the primary file or its backups failed
    #[error("{operation} failed for '{}': {source}", .path.display())]
    Storage {
        /// Which operation was in flight
        operation: StorageOp,
        /// The file the operation targeted
        path: PathBuf,
        /// The underlying cause
        #[source]
        source: StorageCause,
    },

    /// Post-write read-back did not match the bytes handed to the writer.
    /// The target file was not touched.
    #[error("written bytes did not read back identically for '{}'", .path.display())]
    ContentVerification {
        /// The intended target of the write
        path: PathBuf,
    },

    /// The primary file is unreadable and there are no backups to fall
    /// back to
    #[error("primary file '{}' is unreadable and no backups exist", .path.display())]
    NoBackups {
        /// The primary file path
        path: PathBuf,
        /// Why the primary failed to load
        #[source]
        source: StorageCause,
    },

    /// The primary file and every available backup failed to load
    #[error("primary file '{}' and all {attempted} backups are unreadable", .path.display())]
    AllBackupsFailed {
        /// The primary file path
        path: PathBuf,
        /// How many backups were tried before giving up
        attempted: usize,
    },
}

impl VaultError {
    /// Build a [`VaultError::Storage`] from an operation, path and cause
    pub fn storage(
        operation: StorageOp,
        path: impl Into<PathBuf>,
        cause: impl Into<StorageCause>,
    ) -> Self {
        VaultError::Storage {
            operation,
            path: path.into(),
            source: cause.into(),
        }
    }

    /// Build a [`VaultError::PathValidation`] with a reason
    pub fn rejected(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        VaultError::PathValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_carries_operation_and_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = VaultError::storage(StorageOp::Write, "/tmp/state.json", io);

        let message = err.to_string();
        assert!(message.contains("write failed"));
        assert!(message.contains("/tmp/state.json"));
    }

    #[test]
    fn test_path_validation_mentions_reason() {
        let err = VaultError::rejected("../etc/passwd", "traversal segment");
        assert!(err.to_string().contains("traversal segment"));
        assert!(err.to_string().contains("../etc/passwd"));
    }

    #[test]
    fn test_recovery_variants_are_distinguishable() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated");
        let none = VaultError::NoBackups {
            path: "/data/mem.json".into(),
            source: io.into(),
        };
        let all = VaultError::AllBackupsFailed {
            path: "/data/mem.json".into(),
            attempted: 3,
        };

        assert!(none.to_string().contains("no backups exist"));
        assert!(all.to_string().contains("all 3 backups"));
    }
}
