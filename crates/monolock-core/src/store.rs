//! Loading and persisting version sets.

use crate::error::SyncError;
use crate::lockfile::{Lockfile, LOCKFILE_NAME};
use crate::manifest::{Manifest, MANIFEST_NAME};
use futures::future::try_join_all;
use monolock_util::fs::{atomic_write, read_optional};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One project's manifest and lockfile.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSet {
    /// Project directory.
    pub path: PathBuf,
    pub manifest: Manifest,
    pub lockfile: Lockfile,
}

impl VersionSet {
    /// Empty set rooted at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            manifest: Manifest::default(),
            lockfile: Lockfile::default(),
        }
    }

    /// Load `package.json` and `yarn.lock` from `dir`.
    ///
    /// Missing files load as empty.
    ///
    /// # Errors
    /// Returns an error if a file cannot be read or does not parse.
    pub async fn load(dir: &Path) -> Result<Self, SyncError> {
        let (manifest, lockfile) = futures::try_join!(load_manifest(dir), load_lockfile(dir))?;

        debug!(
            dir = %dir.display(),
            lockfile_entries = lockfile.len(),
            "loaded version set"
        );

        Ok(Self {
            path: dir.to_path_buf(),
            manifest,
            lockfile,
        })
    }

    /// Write `package.json` and `yarn.lock`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if either file cannot be written.
    pub async fn save(&self) -> Result<(), SyncError> {
        let manifest = self.manifest.to_json_string();
        let lockfile = self.lockfile.to_yarn_string();
        futures::try_join!(
            write_file(self.path.join(MANIFEST_NAME), manifest),
            write_file(self.path.join(LOCKFILE_NAME), lockfile),
        )?;
        debug!(dir = %self.path.display(), "wrote version set");
        Ok(())
    }
}

/// Load `package.json` from `dir`; a missing file is an empty manifest.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a valid manifest.
pub async fn load_manifest(dir: &Path) -> Result<Manifest, SyncError> {
    let path = dir.join(MANIFEST_NAME);
    match read_file(path.clone()).await? {
        Some(content) => Manifest::parse(&content).map_err(|e| {
            SyncError::new(e.code(), format!("{}: {}", path.display(), e.message()))
        }),
        None => Ok(Manifest::default()),
    }
}

/// Load `yarn.lock` from `dir`; a missing file is an empty lockfile.
///
/// # Errors
/// Returns an error if the file cannot be read or does not parse.
pub async fn load_lockfile(dir: &Path) -> Result<Lockfile, SyncError> {
    let path = dir.join(LOCKFILE_NAME);
    match read_file(path.clone()).await? {
        Some(content) => Lockfile::parse(&content)
            .map_err(|e| SyncError::lockfile_invalid(format!("{}: {e}", path.display()))),
        None => Ok(Lockfile::default()),
    }
}

/// Load every root concurrently, preserving order.
///
/// # Errors
/// Returns the first load error.
pub async fn read_version_sets(roots: &[PathBuf]) -> Result<Vec<VersionSet>, SyncError> {
    try_join_all(roots.iter().map(|root| VersionSet::load(root))).await
}

/// Persist every set concurrently.
///
/// # Errors
/// Returns the first write error.
pub async fn write_version_sets(sets: &[VersionSet]) -> Result<(), SyncError> {
    try_join_all(sets.iter().map(VersionSet::save)).await?;
    Ok(())
}

/// Optional read on the blocking pool; a missing file is `None`.
async fn read_file(path: PathBuf) -> Result<Option<String>, SyncError> {
    tokio::task::spawn_blocking(move || {
        read_optional(&path)
            .map_err(|e| SyncError::io(format!("Failed to read {}: {e}", path.display())))
    })
    .await
    .map_err(|e| SyncError::io(format!("Read task failed: {e}")))?
}

/// Atomic write on the blocking pool.
pub(crate) async fn write_file(path: PathBuf, content: String) -> Result<(), SyncError> {
    tokio::task::spawn_blocking(move || {
        atomic_write(&path, content.as_bytes())
            .map_err(|e| SyncError::io(format!("Failed to write {}: {e}", path.display())))
    })
    .await
    .map_err(|e| SyncError::io(format!("Write task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::lockfile::LockEntry;
    use crate::manifest::DepType;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = tempdir().unwrap();
        let set = VersionSet::load(dir.path()).await.unwrap();
        assert_eq!(set.path, dir.path());
        assert!(set.lockfile.is_empty());
        assert!(set.manifest.entries().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("app");

        let mut set = VersionSet::new(&root);
        set.manifest
            .table_mut(DepType::Dependencies)
            .insert("left-pad".to_string(), "^1.0.0".to_string());
        set.lockfile.insert(
            "left-pad@^1.0.0",
            Arc::new(LockEntry::new("1.3.0", "https://registry.yarnpkg.com/left-pad")),
        );
        set.save().await.unwrap();

        assert!(root.join(MANIFEST_NAME).exists());
        assert!(root.join(LOCKFILE_NAME).exists());

        let loaded = VersionSet::load(&root).await.unwrap();
        assert_eq!(loaded, set);
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_NAME), "{ nope").unwrap();
        let err = VersionSet::load(dir.path()).await.unwrap_err();
        assert_eq!(err.code(), codes::LOCK_MANIFEST_INVALID);
        assert!(err.message().contains(MANIFEST_NAME));
    }

    #[tokio::test]
    async fn test_invalid_lockfile_is_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LOCKFILE_NAME), "  version \"1.0.0\"\n").unwrap();
        let err = VersionSet::load(dir.path()).await.unwrap_err();
        assert_eq!(err.code(), codes::LOCK_LOCKFILE_INVALID);
        assert!(err.message().contains("line 1"));
    }

    #[tokio::test]
    async fn test_unreadable_manifest_is_io_error() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(MANIFEST_NAME)).unwrap();
        let err = VersionSet::load(dir.path()).await.unwrap_err();
        assert_eq!(err.code(), codes::LOCK_IO_ERROR);
        assert!(err.message().contains(MANIFEST_NAME));
    }

    #[tokio::test]
    async fn test_read_version_sets_preserves_order() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join(MANIFEST_NAME), r#"{"name":"a"}"#).unwrap();
        std::fs::write(b.join(MANIFEST_NAME), r#"{"name":"b"}"#).unwrap();

        let sets = read_version_sets(&[b.clone(), a.clone()]).await.unwrap();
        assert_eq!(sets[0].manifest.name(), Some("b"));
        assert_eq!(sets[1].manifest.name(), Some("a"));
    }
}
