//! Cross-process file locking with crash recovery
//!
//! One `<resource>.lock` file per resource, holding a single JSON record
//! naming the owner. Acquisition is an exclusive create-only open: the
//! filesystem arbitrates races, there is no exists-check followed by a
//! write. A contender that finds an unreadable record treats the lock as
//! abandoned and evicts it; a record older than [`STALE_LOCK_THRESHOLD`] is
//! treated the same way, so a crashed holder heals itself after the
//! threshold. No fairness among waiters: a late arrival can win the create
//! race against one that has polled longer.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StorageOp, VaultError};

/// Age beyond which a lock record is treated as abandoned
pub const STALE_LOCK_THRESHOLD: Duration = Duration::from_secs(300);

/// Default acquisition deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default poll interval while the lock is contended
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long a contender waits before declaring an unreadable record corrupt
/// rather than mid-write
const CORRUPT_GRACE: Duration = Duration::from_millis(25);

/// The sole content of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Owning process id
    pub pid: u32,
    /// Host the owning process runs on; diagnostic only, staleness is
    /// wall-clock based and clock skew across hosts is an accepted risk
    pub hostname: String,
    /// When the lock was taken (ISO-8601 UTC on the wire)
    pub timestamp: DateTime<Utc>,
    /// The resource this lock guards
    pub resource: PathBuf,
}

impl LockRecord {
    fn for_resource(resource: &Path) -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            timestamp: Utc::now(),
            resource: resource.to_path_buf(),
        }
    }

    /// True when the record's age exceeds `threshold`. A timestamp in the
    /// future (skewed clock) is never stale.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        (Utc::now() - self.timestamp)
            .to_std()
            .map(|age| age > threshold)
            .unwrap_or(false)
    }
}

/// Proof of a held lock. Dropping the handle releases the lock, so a panic
/// or early return inside a critical section cannot leak it.
#[derive(Debug)]
pub struct LockHandle {
    lock_path: PathBuf,
    released: bool,
}

impl LockHandle {
    /// The lock file this handle owns
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Release the lock. A lock file that is already gone is a no-op, not
    /// an error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::storage(StorageOp::Delete, &self.lock_path, e)),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Lock file path for a resource: `<resource>.lock`
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Acquire an exclusive lock on `resource`, polling every `retry_interval`
/// until `timeout` has elapsed.
///
/// Corrupt and stale lock files are evicted and retried immediately without
/// consuming a poll interval. A timeout leaves no artifact behind.
pub fn acquire(resource: &Path, timeout: Duration, retry_interval: Duration) -> Result<LockHandle> {
    let lock_path = lock_path_for(resource);
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VaultError::storage(StorageOp::Write, &lock_path, e))?;
        }
    }

    let started = Instant::now();
    loop {
        // The create-only open is the race arbiter: exactly one contender
        // can create the file.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let record = LockRecord::for_resource(resource);
                let json = serde_json::to_string_pretty(&record)
                    .map_err(|e| VaultError::storage(StorageOp::Serialize, &lock_path, e))?;
                if let Err(e) = file.write_all(json.as_bytes()).and_then(|_| file.sync_all()) {
                    // Do not hold a lock whose record never made it to disk.
                    drop(file);
                    let _ = std::fs::remove_file(&lock_path);
                    return Err(VaultError::storage(StorageOp::Write, &lock_path, e));
                }
                return Ok(LockHandle {
                    lock_path,
                    released: false,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_record(&lock_path) {
                    Some(record) if record.is_stale(STALE_LOCK_THRESHOLD) => {
                        warn!(
                            path = %lock_path.display(),
                            pid = record.pid,
                            host = %record.hostname,
                            "evicting stale lock"
                        );
                        evict(&lock_path)?;
                        continue;
                    }
                    Some(_) => {
                        // Held by a live owner; wait within the deadline.
                        let elapsed = started.elapsed();
                        if elapsed >= timeout {
                            return Err(VaultError::LockTimeout {
                                path: lock_path,
                                waited_ms: elapsed.as_millis() as u64,
                            });
                        }
                        std::thread::sleep(retry_interval.min(timeout - elapsed));
                    }
                    None => {
                        // A record mid-write also parses as unreadable; give
                        // the winner of the create race one beat to finish
                        // before calling the lock abandoned.
                        std::thread::sleep(CORRUPT_GRACE);
                        if read_record(&lock_path).is_none() {
                            warn!(path = %lock_path.display(), "evicting corrupt lock");
                            evict(&lock_path)?;
                        }
                        continue;
                    }
                }
            }
            Err(e) => {
                return Err(VaultError::storage(StorageOp::Write, &lock_path, e));
            }
        }
    }
}

/// Run `op` while holding the lock on `resource`.
///
/// The lock is released on every exit path before the operation's error, if
/// any, is handed back to the caller.
pub fn with_lock<T, F>(
    resource: &Path,
    timeout: Duration,
    retry_interval: Duration,
    op: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let handle = acquire(resource, timeout, retry_interval)?;
    let result = op();
    let released = handle.release();
    match (result, released) {
        (Err(op_err), _) => Err(op_err),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Ok(value), Ok(())) => Ok(value),
    }
}

/// Parse a lock record; `None` means unreadable or corrupt
fn read_record(lock_path: &Path) -> Option<LockRecord> {
    let content = std::fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Remove an abandoned lock file. A file that is already gone is fine (a
/// rival contender evicted it first); anything else surfaces, so a lock
/// that cannot be removed does not spin the acquire loop forever.
fn evict(lock_path: &Path) -> Result<()> {
    match std::fs::remove_file(lock_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::storage(StorageOp::Delete, lock_path, e)),
    }
}
