//! The fixed local image source.
//!
//! There is no image distribution: every image reference resolves to one
//! local archive, identified by the SHA-256 digest of its bytes. Pulling is
//! a no-op that reports the reference back.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use serde::Serialize;

use crate::hash;

/// Image as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    /// `sha256:<hex>` digest of the archive.
    pub id: String,
    /// References the image is known under.
    pub repo_tags: Vec<String>,
    /// Archive size in bytes.
    pub size_bytes: u64,
}

/// Serves every image reference from a single archive.
#[derive(Debug, Clone)]
pub struct LocalImageSource {
    archive: PathBuf,
}

impl LocalImageSource {
    /// Creates a source backed by `archive`. The file is not touched yet.
    #[must_use]
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
        }
    }

    /// Path of the archive every container is provisioned from.
    #[must_use]
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Accepts any reference and returns it unchanged.
    #[must_use]
    pub fn pull(&self, reference: &str) -> String {
        tracing::info!(image = reference, archive = %self.archive.display(), "pull satisfied by local archive");
        reference.to_string()
    }

    /// Lists the single local image, or nothing if the archive is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive exists but cannot be read.
    pub fn list(&self) -> Result<Vec<ImageInfo>> {
        Ok(self.describe(Vec::new())?.into_iter().collect())
    }

    /// Reports the image behind `reference`, `None` if the archive is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive exists but cannot be read.
    pub fn status(&self, reference: &str) -> Result<Option<ImageInfo>> {
        self.describe(vec![reference.to_string()])
    }

    fn describe(&self, repo_tags: Vec<String>) -> Result<Option<ImageInfo>> {
        let meta = match std::fs::metadata(&self.archive) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CorralError::io(&self.archive, e)),
        };
        let digest = hash::hash_file(&self.archive)?;
        Ok(Some(ImageInfo {
            id: digest.to_string(),
            repo_tags,
            size_bytes: meta.len(),
        }))
    }
}
