//! On-disk layout of the denlite home directory.

use std::path::{Path, PathBuf};

use crate::errors::{DenliteError, DenliteResult};

/// Directory layout rooted at the denlite home (default `~/.denlite`).
#[derive(Debug, Clone)]
pub struct DenliteLayout {
    home_dir: PathBuf,
}

impl DenliteLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    /// Layout at the default location under the user's home directory.
    pub fn default_home() -> DenliteResult<Self> {
        let base = dirs::home_dir()
            .ok_or_else(|| DenliteError::Storage("cannot determine home directory".to_string()))?;
        Ok(Self::new(base.join(".denlite")))
    }

    /// Create every directory the engine writes into. Called once, up
    /// front, so later code never has to check.
    pub fn prepare(&self) -> DenliteResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(DenliteError::Storage(format!(
                "home dir must be an absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        for dir in [self.home_dir.clone(), self.features_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                DenliteError::Storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Root of the content-addressed feature cache.
    pub fn features_dir(&self) -> PathBuf {
        self.home_dir.join("features")
    }

    /// Scratch space for staged downloads.
    pub fn tmp_dir(&self) -> PathBuf {
        self.home_dir.join("tmp")
    }
}
