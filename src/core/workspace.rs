//! Request-scoped scratch directories.
//!
//! Every request gets its own directory under a service-owned root. The
//! directory is removed when the request finishes, however it finishes:
//! `Workspace::release` does it explicitly and `Drop` covers early returns,
//! panics and abandoned requests.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{Result, SeparationError};

pub const WORKSPACE_PREFIX: &str = "stemsep-";

#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, uniquely named directory under the root.
    ///
    /// Creation is a single atomic `mkdir`, so a failure leaves nothing behind.
    pub fn acquire(&self) -> Result<Workspace> {
        fs::create_dir_all(&self.root).map_err(SeparationError::Workspace)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)
            .map_err(SeparationError::Workspace)?;
        let path = dir.path().to_path_buf();
        debug!(workspace = %path.display(), "workspace acquired");
        Ok(Workspace {
            dir: Some(dir),
            path,
        })
    }

    /// Removes workspaces left behind by a previous process.
    ///
    /// Only call this before serving requests; it does not know which
    /// directories belong to live requests.
    pub fn sweep_stale(&self) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_workspace = name.to_str().is_some_and(|n| n.starts_with(WORKSPACE_PREFIX));
            if is_workspace && entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of workspaces currently on disk.
    pub fn active_count(&self) -> usize {
        fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        e.file_name()
                            .to_str()
                            .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX))
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a plain file directly inside the workspace.
    pub fn file(&self, name: &str) -> Result<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !plain {
            return Err(SeparationError::Workspace(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{name}` is not a plain file name"),
            )));
        }
        Ok(self.path.join(name))
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Deletes the directory and everything under it. Releasing twice is a
    /// no-op.
    pub fn release(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                dir.close()?;
                debug!(workspace = %self.path.display(), "workspace released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(workspace = %self.path.display(), error = %e, "failed to remove workspace");
        }
    }
}
