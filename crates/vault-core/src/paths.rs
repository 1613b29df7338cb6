//! Fail-closed path validation
//!
//! Every path handed to the vault passes through [`PathValidator`] before any
//! filesystem access happens on it. The posture is deny-by-default: a path is
//! accepted only when every check conclusively proves it safe — traversal
//! free (including percent-encoded spellings), not network-style, not a
//! symlink unless the caller opted in, not on the blocklist, and contained
//! within the project root or an explicitly allowed base after
//! canonicalization.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, VaultError};

/// Directory and file names that are never valid storage targets.
/// VCS metadata, credential stores, and dependency caches.
const BLOCKED_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".ssh",
    ".aws",
    ".gnupg",
    ".env",
    "credentials",
    "secrets",
    "node_modules",
    "__pycache__",
    ".venv",
    "target",
];

/// Name prefixes that mark credential material (`.env.production`,
/// `id_rsa.pub`, ...)
const BLOCKED_NAME_PREFIXES: &[&str] = &[".env.", "id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

/// Extensions reserved for private-key material
const BLOCKED_EXTENSIONS: &[&str] = &["key", "pem", "p12", "pfx", "ppk"];

/// Validates candidate storage paths against a project root and an optional
/// set of extra allowed bases
#[derive(Debug, Clone)]
pub struct PathValidator {
    project_root: PathBuf,
    allowed_bases: Vec<PathBuf>,
    allow_symlinks: bool,
}

impl PathValidator {
    /// Create a validator rooted at `project_root`
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            allowed_bases: Vec::new(),
            allow_symlinks: false,
        }
    }

    /// Allow paths under an additional base directory
    pub fn with_allowed_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.allowed_bases.push(base.into());
        self
    }

    /// Permit symlinked targets. The link target is resolved and
    /// re-validated; the policy applies to where the data actually lands,
    /// not to the link itself.
    pub fn with_allow_symlinks(mut self, allow: bool) -> Self {
        self.allow_symlinks = allow;
        self
    }

    /// Validate `candidate` and return its canonical form
    pub fn validate(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        let raw = candidate.as_ref();
        if raw.as_os_str().is_empty() {
            return Err(VaultError::rejected(raw, "empty path"));
        }

        let raw_str = raw.to_string_lossy();
        self.check_traversal(raw, &raw_str)?;
        self.check_unc(raw, &raw_str)?;

        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.project_root.join(raw)
        };
        check_blocklist(raw, &absolute)?;

        // Symlink policy applies to the leaf. Ancestor symlinks are resolved
        // by canonicalization below, so an ancestor escaping the root fails
        // the containment check regardless.
        let is_symlink = std::fs::symlink_metadata(&absolute)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            if !self.allow_symlinks {
                return Err(VaultError::rejected(raw, "path is a symlink"));
            }
            let resolved = std::fs::canonicalize(&absolute)
                .map_err(|_| VaultError::rejected(raw, "symlink target cannot be resolved"))?;
            check_blocklist(raw, &resolved)?;
            return self.check_containment(raw, resolved);
        }

        // The leaf (and possibly some ancestors) may not exist yet; a persist
        // target is created by the write. Canonicalize the deepest existing
        // ancestor and re-attach the remainder.
        let (existing, rest) = split_at_existing(&absolute);
        let canonical = std::fs::canonicalize(&existing)
            .map_err(|_| VaultError::rejected(raw, "path cannot be canonicalized"))?;
        let candidate = if rest.as_os_str().is_empty() {
            canonical
        } else {
            canonical.join(rest)
        };
        self.check_containment(raw, candidate)
    }

    /// Reject `..` segments in plain, percent-encoded and double-encoded form
    fn check_traversal(&self, raw: &Path, raw_str: &str) -> Result<()> {
        if has_parent_segment(raw_str) || raw.components().any(|c| c == Component::ParentDir) {
            return Err(VaultError::rejected(raw, "path traversal segment"));
        }

        let mut decoded = raw_str.to_string();
        for _ in 0..2 {
            match urlencoding::decode(&decoded) {
                Ok(next) => {
                    if has_parent_segment(&next) {
                        return Err(VaultError::rejected(raw, "encoded path traversal segment"));
                    }
                    if next.as_ref() == decoded {
                        break;
                    }
                    decoded = next.into_owned();
                }
                // Undecodable escapes cannot be proven safe
                Err(_) => {
                    return Err(VaultError::rejected(raw, "undecodable percent-encoding"));
                }
            }
        }
        Ok(())
    }

    /// Network-style paths are rejected unless that share is itself an
    /// allowed base
    fn check_unc(&self, raw: &Path, raw_str: &str) -> Result<()> {
        let network_style = raw_str.starts_with("\\\\") || raw_str.starts_with("//");
        if network_style && !self.allowed_bases.iter().any(|base| raw.starts_with(base)) {
            return Err(VaultError::rejected(raw, "network path outside allowed bases"));
        }
        Ok(())
    }

    /// Directory-boundary containment against the root and allowed bases
    fn check_containment(&self, raw: &Path, candidate: PathBuf) -> Result<PathBuf> {
        let root = std::fs::canonicalize(&self.project_root)
            .map_err(|_| VaultError::rejected(raw, "project root cannot be canonicalized"))?;
        if candidate.starts_with(&root) {
            return Ok(candidate);
        }
        for base in &self.allowed_bases {
            // A base that cannot be canonicalized proves nothing; skip it.
            if let Ok(base) = std::fs::canonicalize(base) {
                if candidate.starts_with(&base) {
                    return Ok(candidate);
                }
            }
        }
        Err(VaultError::rejected(
            raw,
            "outside project root and allowed bases",
        ))
    }
}

/// True when any `/`- or `\`-separated segment is exactly `..`
fn has_parent_segment(text: &str) -> bool {
    text.split(['/', '\\']).any(|segment| segment == "..")
}

/// Split a path into its deepest existing ancestor and the remainder
fn split_at_existing(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut rest: Vec<OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                rest.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }
    rest.reverse();
    (existing, rest.into_iter().collect())
}

/// Check every segment of `path` against the fixed blocklist
fn check_blocklist(raw: &Path, path: &Path) -> Result<()> {
    for component in path.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let name = name.to_string_lossy().to_lowercase();

        if BLOCKED_NAMES.contains(&name.as_str()) {
            return Err(VaultError::rejected(
                raw,
                format!("blocked segment '{}'", name),
            ));
        }
        if BLOCKED_NAME_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return Err(VaultError::rejected(
                raw,
                format!("credential-like segment '{}'", name),
            ));
        }
        if let Some((_, extension)) = name.rsplit_once('.') {
            if BLOCKED_EXTENSIONS.contains(&extension) {
                return Err(VaultError::rejected(
                    raw,
                    format!("private-key extension '.{}'", extension),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathValidator) {
        let root = TempDir::new().unwrap();
        let validator = PathValidator::new(root.path());
        (root, validator)
    }

    #[test]
    fn test_rejects_plain_traversal() {
        let (_root, validator) = setup();
        let err = validator.validate("../../etc/passwd").unwrap_err();
        assert!(matches!(err, VaultError::PathValidation { .. }));
    }

    #[test]
    fn test_rejects_encoded_and_double_encoded_traversal() {
        let (_root, validator) = setup();
        assert!(validator.validate("%2e%2e/secret.json").is_err());
        assert!(validator.validate("%252e%252e/secret.json").is_err());
    }

    #[test]
    fn test_accepts_relative_path_under_root() {
        let (root, validator) = setup();
        let canonical = validator.validate("state/memory.json").unwrap();
        assert!(canonical.starts_with(root.path().canonicalize().unwrap()));
        assert!(canonical.ends_with("state/memory.json"));
    }

    #[test]
    fn test_accepts_nonexistent_leaf_under_root() {
        let (_root, validator) = setup();
        assert!(validator.validate("not/yet/created.json").is_ok());
    }

    #[test]
    fn test_rejects_absolute_path_outside_root() {
        let (_root, validator) = setup();
        let outside = TempDir::new().unwrap();
        let err = validator
            .validate(outside.path().join("data.json"))
            .unwrap_err();
        assert!(err.to_string().contains("outside project root"));
    }

    #[test]
    fn test_allowed_base_admits_external_path() {
        let (_root, validator) = setup();
        let tools = TempDir::new().unwrap();
        let validator = validator.with_allowed_base(tools.path());

        let canonical = validator.validate(tools.path().join("cache.json")).unwrap();
        assert!(canonical.starts_with(tools.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_prefix_match_respects_directory_boundaries() {
        let (root, validator) = setup();
        // `<root>-evil` shares a string prefix with `<root>` but is a sibling
        let mut evil = root.path().as_os_str().to_os_string();
        evil.push("-evil");
        let evil = PathBuf::from(evil);
        std::fs::create_dir_all(&evil).unwrap();

        assert!(validator.validate(evil.join("data.json")).is_err());
        std::fs::remove_dir_all(&evil).unwrap();
    }

    #[test]
    fn test_blocklist_rejects_vcs_and_credentials() {
        let (_root, validator) = setup();
        assert!(validator.validate(".git/config").is_err());
        assert!(validator.validate("conf/.env").is_err());
        assert!(validator.validate("conf/.env.production").is_err());
        assert!(validator.validate("keys/deploy.pem").is_err());
        assert!(validator.validate("keys/id_rsa").is_err());
        assert!(validator.validate("node_modules/pkg/state.json").is_err());
    }

    #[test]
    fn test_rejects_network_style_path() {
        let (_root, validator) = setup();
        assert!(validator.validate("\\\\server\\share\\data.json").is_err());
        assert!(validator.validate("//server/share/data.json").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_rejected_by_default() {
        let (root, validator) = setup();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("real.json");
        std::fs::write(&target, "{}").unwrap();

        let link = root.path().join("link.json");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = validator.validate(&link).unwrap_err();
        assert!(err.to_string().contains("symlink"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_revalidated_when_allowed() {
        let (root, validator) = setup();
        let validator = validator.with_allow_symlinks(true);

        // Link inside root pointing outside every allowed base: the target
        // fails containment even though the link itself sits under root.
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("real.json");
        std::fs::write(&target, "{}").unwrap();
        let link = root.path().join("escape.json");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert!(validator.validate(&link).is_err());

        // Link pointing back inside root resolves to its target.
        let inside = root.path().join("real.json");
        std::fs::write(&inside, "{}").unwrap();
        let link2 = root.path().join("alias.json");
        std::os::unix::fs::symlink(&inside, &link2).unwrap();
        let resolved = validator.validate(&link2).unwrap();
        assert_eq!(resolved, inside.canonicalize().unwrap());
    }

    #[test]
    fn test_rejects_empty_path() {
        let (_root, validator) = setup();
        assert!(validator.validate("").is_err());
    }
}
