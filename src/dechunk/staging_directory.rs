use std::path::{Path, PathBuf};

/// A staging directory that is removed when dropped, unless committed.
pub(crate) struct StagingDirectory {
    path: PathBuf,
    committed: bool,
}

impl StagingDirectory {
    /// Create an empty staging directory at `path`, removing anything left there by a previous run.
    pub(crate) fn create(path: &Path) -> std::io::Result<Self> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => log::info!("removed stale staging directory {path:?}"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        std::fs::create_dir(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            committed: false,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the staging directory (or whatever it was renamed to).
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for StagingDirectory {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("removed staging directory {:?}", self.path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!(
                "failed to remove staging directory {:?}: {err}",
                self.path
            ),
        }
    }
}
