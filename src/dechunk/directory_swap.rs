use std::path::{Path, PathBuf};

use super::DechunkError;

/// The state of a [`DirectorySwap`].
///
/// A crash in [`ReplaceState::OriginalMoved`] leaves the original array at the backup path, where it must be recovered manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceState {
    /// The original directory is in place and the replacement is staged.
    OriginalIntact,
    /// The original directory has been renamed to the backup path.
    OriginalMoved,
    /// The staged directory has been renamed to the original path.
    SwapComplete,
    /// The backup has been removed.
    CleanupComplete,
}

/// Fail with [`std::io::ErrorKind::AlreadyExists`] if `backup` exists, since it would be overwritten.
pub(crate) fn ensure_no_backup(backup: &Path) -> Result<(), DechunkError> {
    if backup.exists() {
        Err(DechunkError::IOError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("backup path {backup:?} already exists"),
        )))
    } else {
        Ok(())
    }
}

/// Replaces a directory with a staged directory using two renames and a removal.
pub(crate) struct DirectorySwap<'a> {
    original: &'a Path,
    staging: &'a Path,
    backup: PathBuf,
    state: ReplaceState,
}

impl<'a> DirectorySwap<'a> {
    pub(crate) fn new(original: &'a Path, staging: &'a Path, backup: PathBuf) -> Self {
        Self {
            original,
            staging,
            backup,
            state: ReplaceState::OriginalIntact,
        }
    }

    pub(crate) fn state(&self) -> ReplaceState {
        self.state
    }

    /// Advance to the next state.
    ///
    /// If the staged directory cannot be moved into place, the original is moved back and the swap returns to [`ReplaceState::OriginalIntact`].
    pub(crate) fn step(&mut self) -> Result<ReplaceState, DechunkError> {
        let next = match self.state {
            ReplaceState::OriginalIntact => {
                ensure_no_backup(&self.backup)?;
                std::fs::rename(self.original, &self.backup)?;
                ReplaceState::OriginalMoved
            }
            ReplaceState::OriginalMoved => {
                if let Err(err) = std::fs::rename(self.staging, self.original) {
                    return match std::fs::rename(&self.backup, self.original) {
                        Ok(()) => {
                            self.state = ReplaceState::OriginalIntact;
                            Err(err.into())
                        }
                        Err(_) => Err(DechunkError::ReplaceInterrupted {
                            backup: self.backup.clone(),
                            source: err,
                        }),
                    };
                }
                ReplaceState::SwapComplete
            }
            ReplaceState::SwapComplete => {
                std::fs::remove_dir_all(&self.backup)?;
                ReplaceState::CleanupComplete
            }
            ReplaceState::CleanupComplete => ReplaceState::CleanupComplete,
        };
        self.state = next;
        log::debug!("replace {:?}: {:?}", self.original, self.state);
        Ok(self.state)
    }

    /// Run the swap to completion.
    ///
    /// Failing to remove the backup is not an error once the swap is complete, it is logged and the backup is left behind.
    pub(crate) fn run(mut self) -> Result<ReplaceState, DechunkError> {
        while self.state() != ReplaceState::SwapComplete {
            self.step()?;
        }
        if let Err(err) = self.step() {
            log::warn!(
                "replaced {:?}, but failed to remove the original at {:?}: {err}",
                self.original,
                self.backup
            );
        }
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_dir(path: &Path, file: &str) {
        std::fs::create_dir(path).unwrap();
        std::fs::write(path.join(file), [0u8]).unwrap();
    }

    #[test]
    fn directory_swap_states() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("array.zarr");
        let staging = dir.path().join("array.zarr.new");
        let backup = dir.path().join("array.zarr.temp");
        make_dir(&original, "original");
        make_dir(&staging, "staged");

        let mut swap = DirectorySwap::new(&original, &staging, backup.clone());
        assert_eq!(swap.state(), ReplaceState::OriginalIntact);
        assert_eq!(swap.step().unwrap(), ReplaceState::OriginalMoved);
        assert!(backup.join("original").exists());
        assert!(!original.exists());
        assert_eq!(swap.step().unwrap(), ReplaceState::SwapComplete);
        assert!(original.join("staged").exists());
        assert!(!staging.exists());
        assert_eq!(swap.step().unwrap(), ReplaceState::CleanupComplete);
        assert!(!backup.exists());
    }

    #[test]
    fn directory_swap_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("array.zarr");
        let staging = dir.path().join("missing.zarr.new");
        let backup = dir.path().join("array.zarr.temp");
        make_dir(&original, "original");

        let swap = DirectorySwap::new(&original, &staging, backup.clone());
        assert!(matches!(swap.run(), Err(DechunkError::IOError(_))));
        assert!(original.join("original").exists());
        assert!(!backup.exists());
    }

    #[test]
    fn directory_swap_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("array.zarr");
        let staging = dir.path().join("array.zarr.new");
        let backup = dir.path().join("array.zarr.temp");
        make_dir(&original, "original");
        make_dir(&staging, "staged");
        make_dir(&backup, "unrelated");

        let swap = DirectorySwap::new(&original, &staging, backup.clone());
        assert!(swap.run().is_err());
        assert!(original.join("original").exists());
        assert!(backup.join("unrelated").exists());
    }
}
