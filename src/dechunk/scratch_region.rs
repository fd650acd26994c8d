use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use memmap2::MmapMut;

/// A zero-initialised scratch region backed by a memory-mapped file.
///
/// Pages are written back to the file by the kernel, so resident memory is not bounded by the array size.
pub(crate) struct ScratchRegion {
    path: PathBuf,
    // None if the region is empty, since a file cannot be mapped with zero length
    mmap: Option<MmapMut>,
}

impl ScratchRegion {
    /// Create (or truncate) the file at `path` and map `size` zeroed bytes of it.
    pub(crate) fn create(path: &Path, size: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size as u64)?;
        let mmap = if size == 0 {
            None
        } else {
            // SAFETY: the file is private to the staging directory and is not modified externally while mapped
            Some(unsafe { MmapMut::map_mut(&file)? })
        };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(mmap) => &mut mmap[..],
            None => &mut [],
        }
    }

    /// Unmap the region and delete its file.
    pub(crate) fn remove(mut self) -> std::io::Result<()> {
        drop(self.mmap.take());
        std::fs::remove_file(&self.path)
    }
}
