//! Configuration snapshots and the atomic writer behind them.
//!
//! ## `apply`: replace protocol
//!
//! 1. Ensure the parent directory exists.
//! 2. Write the full content to `<path>.rigging.tmp`.
//! 3. Rename over the final path (atomic on POSIX); a running daemon
//!    never observes a half-written file.
//! 4. On rename failure, remove the temp file and leave the original intact.
//!
//! ## `restore`
//!
//! Re-applies the captured bytes, deletes the resource when it did not exist
//! at capture time, and skips the write when the on-disk digest already
//! matches the captured one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use similar::TextDiff;

use crate::digest;
use crate::error::{io_err, SnapshotError};

// ---------------------------------------------------------------------------
// Restore result
// ---------------------------------------------------------------------------

/// Outcome of restoring a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Prior content was written back.
    Rewritten { path: PathBuf },
    /// The resource did not exist at capture time and was deleted.
    Removed { path: PathBuf },
    /// On-disk state already matched the captured state.
    Unchanged { path: PathBuf },
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Atomically replace the content of `path`.
pub fn apply(path: &Path, content: impl AsRef<[u8]>) -> Result<(), SnapshotError> {
    let tmp = PathBuf::from(format!("{}.rigging.tmp", path.display()));
    apply_with_tmp(path, content.as_ref(), &tmp)
}

fn apply_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("applied: {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// ConfigSnapshot
// ---------------------------------------------------------------------------

/// Captured prior state of one file-backed configuration resource.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    resource: PathBuf,
    prior: Option<Vec<u8>>,
    prior_digest: Option<String>,
    applied: Option<Vec<u8>>,
    captured_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    /// Read the current content of `path`.
    ///
    /// A missing file is a valid "not present" snapshot; any other read
    /// failure is [`SnapshotError::ResourceUnavailable`].
    pub fn capture(path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let resource = path.into();
        let prior = match std::fs::read(&resource) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(io_err(&resource, err)),
        };
        let prior_digest = prior.as_deref().map(digest::of_bytes);
        tracing::debug!(
            "captured {} ({})",
            resource.display(),
            if prior.is_some() { "present" } else { "absent" }
        );
        Ok(Self {
            resource,
            prior,
            prior_digest,
            applied: None,
            captured_at: Utc::now(),
        })
    }

    pub fn resource(&self) -> &Path {
        &self.resource
    }

    /// Bytes present at capture time (`None` = resource absent).
    pub fn prior(&self) -> Option<&[u8]> {
        self.prior.as_deref()
    }

    pub fn applied(&self) -> Option<&[u8]> {
        self.applied.as_deref()
    }

    pub fn existed(&self) -> bool {
        self.prior.is_some()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Atomically overwrite the resource with `content`.
    pub fn apply(&mut self, content: impl AsRef<[u8]>) -> Result<(), SnapshotError> {
        let bytes = content.as_ref();
        apply(&self.resource, bytes)?;
        self.applied = Some(bytes.to_vec());
        Ok(())
    }

    /// Return the resource to its captured state.
    pub fn restore(&self) -> Result<RestoreOutcome, SnapshotError> {
        let path = self.resource.clone();
        let current = digest::of_file(&self.resource)?;

        if current == self.prior_digest {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(RestoreOutcome::Unchanged { path });
        }

        match &self.prior {
            Some(bytes) => {
                apply(&self.resource, bytes)?;
                tracing::info!("restored: {}", path.display());
                Ok(RestoreOutcome::Rewritten { path })
            }
            None => match std::fs::remove_file(&self.resource) {
                Ok(()) => {
                    tracing::info!("removed: {}", path.display());
                    Ok(RestoreOutcome::Removed { path })
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    Ok(RestoreOutcome::Unchanged { path })
                }
                Err(err) => Err(io_err(&self.resource, err)),
            },
        }
    }

    /// Unified diff from the captured content to the applied content.
    pub fn diff(&self) -> String {
        let before = String::from_utf8_lossy(self.prior.as_deref().unwrap_or_default());
        let after = String::from_utf8_lossy(self.applied.as_deref().unwrap_or_default());
        let header = self.resource.display().to_string();
        TextDiff::from_lines(before.as_ref(), after.as_ref())
            .unified_diff()
            .header(&format!("a/{header}"), &format!("b/{header}"))
            .context_radius(3)
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn capture_missing_resource_is_not_present() {
        let tmp = TempDir::new().unwrap();
        let snap = ConfigSnapshot::capture(tmp.path().join("ar.conf")).unwrap();
        assert!(!snap.existed());
        assert!(snap.prior().is_none());
    }

    #[test]
    #[cfg(unix)]
    fn capture_unreadable_resource_is_resource_unavailable() {
        let tmp = TempDir::new().unwrap();
        // Reading a directory as a file fails with something other than NotFound.
        let err = ConfigSnapshot::capture(tmp.path()).unwrap_err();
        assert!(matches!(err, SnapshotError::ResourceUnavailable { .. }));
    }

    #[test]
    fn apply_then_restore_existing_resource() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ossec.conf");
        fs::write(&path, "original\n").unwrap();

        let mut snap = ConfigSnapshot::capture(&path).unwrap();
        snap.apply("test config\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "test config\n");

        let outcome = snap.restore().unwrap();
        assert!(matches!(outcome, RestoreOutcome::Rewritten { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original\n");
    }

    #[test]
    fn restore_absent_resource_removes_it() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etc").join("shared").join("ar.conf");

        let mut snap = ConfigSnapshot::capture(&path).unwrap();
        snap.apply("restart-wazuh0 - restart-wazuh - 0\n").unwrap();
        assert!(path.exists());

        assert!(matches!(
            snap.restore().unwrap(),
            RestoreOutcome::Removed { .. }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn restore_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ossec.conf");
        fs::write(&path, "original").unwrap();

        let mut snap = ConfigSnapshot::capture(&path).unwrap();
        snap.apply("changed").unwrap();
        snap.restore().unwrap();
        assert!(matches!(
            snap.restore().unwrap(),
            RestoreOutcome::Unchanged { .. }
        ));
    }

    #[test]
    fn tmp_file_removed_after_apply() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clean.conf");
        apply(&path, "data").unwrap();
        let tmp_path = PathBuf::from(format!("{}.rigging.tmp", path.display()));
        assert!(!tmp_path.exists(), ".rigging.tmp must be cleaned up");
    }

    #[test]
    fn diff_shows_applied_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ossec.conf");
        fs::write(&path, "<logall>no</logall>\n").unwrap();
        let mut snap = ConfigSnapshot::capture(&path).unwrap();
        snap.apply("<logall>yes</logall>\n").unwrap();

        let diff = snap.diff();
        assert!(diff.contains("-<logall>no</logall>"));
        assert!(diff.contains("+<logall>yes</logall>"));
    }

    #[test]
    #[cfg(unix)]
    fn rename_failure_leaves_original_and_cleans_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let readonly_dir = root.path().join("readonly");
        fs::create_dir_all(&readonly_dir).unwrap();

        let path = readonly_dir.join("ossec.conf");
        fs::write(&path, "original").unwrap();

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        let tmp_dir = TempDir::new().unwrap();
        let tmp_path = tmp_dir.path().join("ossec.conf.rigging.tmp");

        let result = apply_with_tmp(&path, b"new content", &tmp_path);

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        // Root bypasses directory permissions; only assert when the rename failed.
        if result.is_err() {
            assert_eq!(fs::read_to_string(&path).unwrap(), "original");
            assert!(!tmp_path.exists(), ".rigging.tmp should be cleaned up");
        }
    }
}
