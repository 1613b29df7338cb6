//! Best-effort permission hardening
//!
//! Stored records and their backups are restricted to the current principal
//! where the platform can express that cheaply (mode bits on Unix). Where it
//! cannot, the platform default ACL stands. Hardening is best-effort by
//! contract: callers log a warning on failure and keep going, a missing
//! privilege must never block a durable write.

use std::io;
use std::path::Path;

/// Capability for restricting filesystem entries to the current principal
pub trait Hardener: Send + Sync {
    /// Restrict a file so only the current principal can read or write it
    fn restrict_file(&self, path: &Path) -> io::Result<()>;

    /// Restrict a directory so only the current principal can traverse it
    fn restrict_dir(&self, path: &Path) -> io::Result<()>;
}

/// Mode-bit hardener: 0600 files, 0700 directories
#[cfg(unix)]
#[derive(Debug)]
struct OwnerOnly;

#[cfg(unix)]
impl Hardener for OwnerOnly {
    fn restrict_file(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
    }

    fn restrict_dir(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
    }
}

/// Fallback hardener: leaves the platform default ACL in place
#[cfg(not(unix))]
#[derive(Debug)]
struct Noop;

#[cfg(not(unix))]
impl Hardener for Noop {
    fn restrict_file(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn restrict_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// The hardener for the current platform
pub fn platform() -> &'static dyn Hardener {
    #[cfg(unix)]
    {
        static HARDENER: OwnerOnly = OwnerOnly;
        &HARDENER
    }
    #[cfg(not(unix))]
    {
        static HARDENER: Noop = Noop;
        &HARDENER
    }
}

/// Restrict a file to the current principal, best-effort
pub fn restrict_file(path: &Path) -> io::Result<()> {
    platform().restrict_file(path)
}

/// Restrict a directory to the current principal, best-effort
pub fn restrict_dir(path: &Path) -> io::Result<()> {
    platform().restrict_dir(path)
}
