//! Scoped Artifacts
//!
//! A job's local output file lives exactly as long as its [`ScopedArtifact`].

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Deletes the file at `path` (if any) when dropped
#[derive(Debug)]
pub struct ScopedArtifact {
    path: PathBuf,
}

impl ScopedArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove artifact {}: {}", self.path.display(), e),
        }
    }
}
