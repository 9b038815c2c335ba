//! Transient raster files.
//!
//! Every barcode is written to its own temporary PNG before layout. Files are
//! acquired through an [`ArtifactScope`], which owns the handles and removes
//! the files when released or dropped. A failed build therefore never leaves
//! files behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Suffix of every transient barcode file
pub const ARTIFACT_SUFFIX: &str = "_qrtag.png";

const ARTIFACT_PREFIX: &str = "qrtag-";

/// Path of one transient file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactHandle {
    path: PathBuf,
}

impl ArtifactHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates and removes uniquely named files in one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the system temp directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new empty file with a unique name and hand over its path.
    ///
    /// The file stays on disk until [`release`](Self::release) is called.
    pub fn acquire(&self) -> Result<ArtifactHandle> {
        let file = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(ARTIFACT_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::ArtifactIo {
                path: self.dir.clone(),
                reason: format!("Failed to create temp file: {e}"),
            })?;

        let (_, path) = file.keep().map_err(|e| Error::ArtifactIo {
            path: e.file.path().to_path_buf(),
            reason: format!("Failed to keep temp file: {}", e.error),
        })?;

        debug!("Acquired artifact {}", path.display());
        Ok(ArtifactHandle { path })
    }

    /// Delete the file behind `handle`. A file that is already gone is not an error.
    pub fn release(&self, handle: &ArtifactHandle) -> Result<()> {
        match std::fs::remove_file(&handle.path) {
            Ok(()) => {
                debug!("Released artifact {}", handle.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::ArtifactIo {
                path: handle.path.clone(),
                reason: format!("Failed to remove: {e}"),
            }),
        }
    }

    /// Release every handle, continuing past failures.
    ///
    /// All failures are returned together as [`Error::ArtifactCleanup`].
    pub fn release_all<'a>(
        &self,
        handles: impl IntoIterator<Item = &'a ArtifactHandle>,
    ) -> Result<()> {
        let failures: Vec<String> = handles
            .into_iter()
            .filter_map(|handle| self.release(handle).err())
            .map(|e| e.to_string())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ArtifactCleanup { failures })
        }
    }

    /// Start a scope whose artifacts are released on every exit path
    pub const fn scope(&self) -> ArtifactScope<'_> {
        ArtifactScope {
            store: self,
            handles: Vec::new(),
        }
    }
}

/// Owns the artifacts of one build.
///
/// A handle is recorded before `acquire` returns, so nothing created here can
/// escape cleanup. [`release`](Self::release) reports failures; dropping an
/// unreleased scope releases best-effort and logs them.
#[derive(Debug)]
pub struct ArtifactScope<'a> {
    store: &'a ArtifactStore,
    handles: Vec<ArtifactHandle>,
}

impl ArtifactScope<'_> {
    pub fn acquire(&mut self) -> Result<&ArtifactHandle> {
        let handle = self.store.acquire()?;
        self.handles.push(handle);
        self.handles.last().ok_or_else(|| Error::ArtifactIo {
            path: self.store.dir.clone(),
            reason: "acquired handle was not recorded".to_string(),
        })
    }

    pub fn handles(&self) -> &[ArtifactHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Remove every file acquired through this scope
    pub fn release(mut self) -> Result<()> {
        let handles = std::mem::take(&mut self.handles);
        self.store.release_all(&handles)
    }
}

impl Drop for ArtifactScope<'_> {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        if let Err(e) = self.store.release_all(&handles) {
            warn!("{e}");
        }
    }
}
