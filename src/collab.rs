//! External collaborators notified after a commit.
//!
//! Both hooks are best-effort: the post-commit worker logs and counts their
//! failures, nothing is ever rolled back because of them.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::CollaboratorError;
use crate::types::MediaRef;

/// Removes blobs that are no longer referenced by any lesson.
pub trait MediaStore: Send + Sync {
    fn delete(&self, media: &MediaRef) -> Result<(), CollaboratorError>;
}

/// Receives cache-key patterns that went stale with a commit.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, patterns: &[String]) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMediaStore;

impl MediaStore for NoopMediaStore {
    fn delete(&self, _media: &MediaRef) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheInvalidator;

impl CacheInvalidator for NoopCacheInvalidator {
    fn invalidate(&self, _patterns: &[String]) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Media kept as plain files below a root directory.
///
/// References are paths relative to the root. A reference that is absolute or
/// climbs out of the root is refused. A file that is already gone counts as
/// removed.
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    const SERVICE: &'static str = "media store";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, media: &MediaRef) -> Result<PathBuf, CollaboratorError> {
        let relative = Path::new(media.as_str());
        let contained = !media.as_str().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(CollaboratorError::new(
                Self::SERVICE,
                format!("media reference '{media}' escapes {}", self.root.display()),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl MediaStore for FsMediaStore {
    fn delete(&self, media: &MediaRef) -> Result<(), CollaboratorError> {
        let path = self.resolve(media)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = ?path, "Removed media file");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CollaboratorError::new(
                Self::SERVICE,
                format!("failed to remove {}: {err}", path.display()),
            )),
        }
    }
}
