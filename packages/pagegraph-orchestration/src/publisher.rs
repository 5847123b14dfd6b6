//! Artifact publisher
//!
//! Writes rendered pages under the output root using the stable layout from
//! [`crate::addressing`]. A reader never observes a partially written page
//! or an empty directory: pages are replaced by rename, and subtrees are
//! renamed aside to a tombstone before they are deleted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::addressing::{BucketKey, SubtreeKey};
use crate::error::RebuildError;

pub const INDEX_FILE: &str = "index.html";

/// Publisher port
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Atomically replace the bucket's artifact. Returns the written path.
    async fn publish(&self, key: &BucketKey, markup: &str) -> Result<PathBuf, RebuildError>;

    /// Remove a subtree. `Ok(false)` when it was already absent.
    async fn remove_subtree(&self, subtree: &SubtreeKey) -> Result<bool, RebuildError>;

    /// Current artifact content, `None` when not published
    async fn read(&self, key: &BucketKey) -> Result<Option<String>, RebuildError>;

    /// Where the serving layer finds the bucket's artifact
    fn artifact_path(&self, key: &BucketKey) -> PathBuf;
}

/// Filesystem publisher rooted at the output directory
#[derive(Debug, Clone)]
pub struct FsPublisher {
    root: PathBuf,
    fsync: bool,
}

impl FsPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fsync: true,
        }
    }

    /// Disable fsync (tests, throwaway builds)
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}

async fn blocking<T, F>(f: F) -> Result<T, RebuildError>
where
    F: FnOnce() -> Result<T, RebuildError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RebuildError::Panicked(e.to_string()))?
}

fn write_atomic(dir: &Path, markup: &str, fsync: bool) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".index.html.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(markup.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }

    if fsync {
        tmp.as_file().sync_all()?;
    }

    let target = dir.join(INDEX_FILE);
    tmp.persist(&target).map_err(|e| e.error)?;

    #[cfg(unix)]
    if fsync {
        fs::File::open(dir)?.sync_all()?;
    }

    Ok(target)
}

fn remove_atomic(dir: &Path) -> std::io::Result<bool> {
    let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("refusing to remove {}", dir.display()),
        ));
    };

    let tombstone = parent.join(format!(
        ".{}.removing-{}",
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));
    match fs::rename(dir, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }

    // Readers already see 404; a leftover tombstone is only wasted space
    if let Err(e) = fs::remove_dir_all(&tombstone) {
        warn!(tombstone = %tombstone.display(), error = %e, "Failed to delete tombstone");
    }
    Ok(true)
}

#[async_trait]
impl Publisher for FsPublisher {
    async fn publish(&self, key: &BucketKey, markup: &str) -> Result<PathBuf, RebuildError> {
        let dir = self.root.join(key.relative_dir());
        let markup = markup.to_string();
        let fsync = self.fsync;

        let path = blocking(move || {
            write_atomic(&dir, &markup, fsync).map_err(|e| RebuildError::publish(dir, e))
        })
        .await?;

        debug!(bucket = %key, path = %path.display(), "Published");
        Ok(path)
    }

    async fn remove_subtree(&self, subtree: &SubtreeKey) -> Result<bool, RebuildError> {
        let dir = self.root.join(subtree.relative_dir());
        let removed = blocking(move || {
            remove_atomic(&dir).map_err(|e| RebuildError::publish(dir, e))
        })
        .await?;

        debug!(subtree = %subtree, removed, "Removed subtree");
        Ok(removed)
    }

    async fn read(&self, key: &BucketKey) -> Result<Option<String>, RebuildError> {
        let path = self.artifact_path(key);
        blocking(move || match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RebuildError::publish(path, e)),
        })
        .await
    }

    fn artifact_path(&self, key: &BucketKey) -> PathBuf {
        self.root.join(key.relative_dir()).join(INDEX_FILE)
    }
}
