//! Convert a chunked Zarr V2 array into a single chunk array.
//!
//! The [`Dechunker`] decodes each chunk of the leading axis in order into a memory-mapped scratch file inside a staging directory (`<array>.new`).
//! The scratch region is then encoded as one chunk with the same compressor, and the array metadata is rewritten with `chunks[0] = shape[0]`.
//!
//! Without [`DechunkOptions::replace`], the staging directory is the output.
//! With it, the staging directory is swapped into the place of the input array:
//!  1. `<array>` is renamed to `<array>.temp`,
//!  2. `<array>.new` is renamed to `<array>`,
//!  3. `<array>.temp` is removed.
//!
//! The staging directory is removed if any step fails, so the input array is only modified by a successful replace.

mod decoded_chunks;
mod dechunk_error;
mod directory_swap;
mod scratch_region;
mod staging_directory;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use clap::Parser;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon_iter_concurrent_limit::iter_concurrent_limit;
use serde::{Deserialize, Serialize};

pub use decoded_chunks::{DecodedChunk, DecodedChunks};
pub use dechunk_error::DechunkError;
pub use directory_swap::ReplaceState;

use decoded_chunks::decode_chunk;
use directory_swap::{ensure_no_backup, DirectorySwap};
use scratch_region::ScratchRegion;
use staging_directory::StagingDirectory;

use crate::{
    compressor::{compressor_from_metadata, CompressorTraits},
    metadata::{ArrayMetadata, MetadataError, ARRAY_METADATA_KEY},
    progress::{Progress, ProgressCallback},
};

/// The suffix of the staging directory, which holds the output until it is committed.
pub const STAGING_SUFFIX: &str = ".new";

/// The suffix the input array is moved to while it is being replaced.
pub const BACKUP_SUFFIX: &str = ".temp";

/// The name of the scratch file in the staging directory.
pub const SCRATCH_KEY: &str = "0.mmap";

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub struct DechunkOptions {
    /// Replace the input array with the single chunk array.
    ///
    /// Otherwise, the single chunk array is written next to the input array with a `.new` suffix.
    #[serde(default)]
    #[arg(short, long, default_value_t = false)]
    pub replace: bool,

    /// Number of chunks decoded concurrently.
    ///
    /// Defaults to 1, chunks are decoded sequentially.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub concurrent_chunks: Option<usize>,
}

/// The outcome of a successful [`Dechunker::dechunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DechunkSummary {
    /// The single chunk array: the input path if replaced, otherwise the staging path.
    pub output_path: PathBuf,
    /// The number of chunks of the input array.
    pub num_chunks: u64,
    /// The total size of the input chunks.
    pub bytes_read: usize,
    /// The size of the array.
    pub bytes_decoded: usize,
    /// The size of the output chunk.
    pub bytes_written: usize,
    /// True if the input array was replaced.
    pub replaced: bool,
}

/// Converts a chunked Zarr V2 array into a single chunk array.
#[derive(Debug)]
pub struct Dechunker {
    store_path: PathBuf,
    metadata: ArrayMetadata,
    compressor: Arc<dyn CompressorTraits>,
}

/// Append `suffix` to the final component of `path`.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(OsString::new);
    name.push(suffix);
    path.with_file_name(name)
}

impl Dechunker {
    /// Open the Zarr V2 array at `store_path`.
    ///
    /// Reads the array metadata and creates the compressor. No chunks are read.
    ///
    /// # Errors
    /// Returns [`DechunkError::NotAStore`] if there is no `.zarray` at `store_path`, or a metadata or compressor error if it is invalid.
    pub fn open<P: AsRef<Path>>(store_path: P) -> Result<Self, DechunkError> {
        let store_path = store_path.as_ref();
        let metadata_path = store_path.join(ARRAY_METADATA_KEY);
        if !metadata_path.is_file() {
            return Err(DechunkError::NotAStore(store_path.to_path_buf()));
        }

        // Sibling paths need a final component, which `.` or `..` do not have
        let store_path = if store_path.file_name().is_some() {
            store_path.to_path_buf()
        } else {
            std::fs::canonicalize(store_path)?
        };

        let metadata = ArrayMetadata::from_path(&metadata_path)?;
        let compressor = compressor_from_metadata(metadata.compressor(), metadata.data_type())?;
        log::info!(
            "opened {store_path:?}: shape {:?}, chunks {:?}, dtype {}, compressor {}",
            metadata.shape(),
            metadata.chunks(),
            metadata.data_type(),
            compressor.identifier(),
        );

        Ok(Self {
            store_path,
            metadata,
            compressor,
        })
    }

    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    #[must_use]
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn compressor(&self) -> &Arc<dyn CompressorTraits> {
        &self.compressor
    }

    /// The path of the staging directory, `<array>.new`.
    #[must_use]
    pub fn staging_path(&self) -> PathBuf {
        sibling_path(&self.store_path, STAGING_SUFFIX)
    }

    /// The path the input array is moved to during a replace, `<array>.temp`.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        sibling_path(&self.store_path, BACKUP_SUFFIX)
    }

    /// Returns an iterator over the decoded chunks of the array, in ascending index order.
    ///
    /// Each chunk is truncated to the rows remaining in the array, so the concatenated chunks hold exactly `shape[0]` rows.
    #[must_use]
    pub fn decoded_chunks(&self) -> DecodedChunks<'_> {
        DecodedChunks::new(&self.store_path, &self.metadata, self.compressor.as_ref())
    }

    /// Convert the array to a single chunk.
    ///
    /// # Errors
    /// Returns a [`DechunkError`] if any chunk cannot be read or decoded, the chunks do not match the array shape, or on an IO error.
    /// The staging directory is removed before the error is returned.
    pub fn dechunk(
        &self,
        options: &DechunkOptions,
        progress_callback: &ProgressCallback,
    ) -> Result<DechunkSummary, DechunkError> {
        if options.replace {
            ensure_no_backup(&self.backup_path())?;
        }
        let staging = StagingDirectory::create(&self.staging_path())?;
        let mut summary = self.write_single_chunk(staging.path(), options, progress_callback)?;

        if options.replace {
            let swap = DirectorySwap::new(&self.store_path, staging.path(), self.backup_path());
            swap.run()?;
            summary.output_path.clone_from(&self.store_path);
            summary.replaced = true;
        }
        staging.commit();

        log::info!(
            "wrote {} chunks of {:?} as a single chunk to {:?}",
            summary.num_chunks,
            self.store_path,
            summary.output_path
        );
        Ok(summary)
    }

    fn write_single_chunk(
        &self,
        staging_path: &Path,
        options: &DechunkOptions,
        progress_callback: &ProgressCallback,
    ) -> Result<DechunkSummary, DechunkError> {
        let num_chunks = self.metadata.num_chunks();
        let size = self
            .metadata
            .size()
            .ok_or_else(|| DechunkError::Other("array size exceeds usize::MAX".to_string()))?;
        let progress = Progress::new(
            usize::try_from(num_chunks).unwrap_or(usize::MAX).saturating_add(1),
            progress_callback,
        );

        let mut scratch = ScratchRegion::create(&staging_path.join(SCRATCH_KEY), size)?;
        let bytes_read = match options.concurrent_chunks {
            Some(concurrent_chunks) if concurrent_chunks > 1 => {
                self.decode_concurrent(scratch.as_mut_slice(), concurrent_chunks, &progress)?
            }
            _ => self.decode_sequential(scratch.as_mut_slice(), &progress)?,
        };

        let metadata_out = self.metadata.with_single_chunk();
        let encoded = progress.process(|| self.compressor.encode(scratch.as_slice()))?;
        let chunk_path = staging_path.join(metadata_out.chunk_key(0));
        progress.write(|| {
            // Nested chunk keys (`/` separator) need their parent directories
            if let Some(parent) = chunk_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&chunk_path, &encoded)
        })?;
        let metadata_json = metadata_out
            .to_json_pretty()
            .map_err(MetadataError::from)?;
        progress.write(|| std::fs::write(staging_path.join(ARRAY_METADATA_KEY), metadata_json))?;
        scratch.remove()?;
        progress.next();

        Ok(DechunkSummary {
            output_path: staging_path.to_path_buf(),
            num_chunks,
            bytes_read,
            bytes_decoded: size,
            bytes_written: encoded.len(),
            replaced: false,
        })
    }

    /// Copy each decoded chunk to the next unfilled rows of `scratch`.
    fn decode_sequential(
        &self,
        scratch: &mut [u8],
        progress: &Progress,
    ) -> Result<usize, DechunkError> {
        let row_size = self.metadata.row_size();
        let mut rows = 0u64;
        let mut offset = 0usize;
        let mut bytes_read = 0usize;
        let mut chunks = self.decoded_chunks();
        while let Some(chunk) = progress.read(|| chunks.next()) {
            let chunk = chunk?;
            let region = scratch
                .get_mut(offset..offset + chunk.bytes().len())
                .ok_or(DechunkError::ShapeMismatch {
                    expected: self.metadata.num_rows(),
                    actual: rows + chunk.rows(),
                })?;
            region.copy_from_slice(chunk.bytes());
            offset += chunk.rows() as usize * row_size;
            rows += chunk.rows();
            bytes_read += chunk.encoded_size();
            progress.next();
        }

        if rows == self.metadata.num_rows() {
            Ok(bytes_read)
        } else {
            Err(DechunkError::ShapeMismatch {
                expected: self.metadata.num_rows(),
                actual: rows,
            })
        }
    }

    /// Decode chunks concurrently, each into its own disjoint rows of `scratch`.
    fn decode_concurrent(
        &self,
        scratch: &mut [u8],
        concurrent_chunks: usize,
        progress: &Progress,
    ) -> Result<usize, DechunkError> {
        let num_rows = self.metadata.num_rows();
        let chunk_rows = self.metadata.chunk_rows();
        let region_size = usize::try_from(std::cmp::min(chunk_rows, num_rows))
            .unwrap_or(usize::MAX)
            * self.metadata.row_size();
        if region_size == 0 {
            return Ok(0);
        }

        let regions: Vec<(u64, &mut [u8])> = scratch
            .chunks_mut(region_size)
            .enumerate()
            .map(|(index, region)| (index as u64, region))
            .collect();
        if regions.len() as u64 != self.metadata.num_chunks() {
            return Err(DechunkError::Other(format!(
                "scratch region holds {} chunks, expected {}",
                regions.len(),
                self.metadata.num_chunks()
            )));
        }

        let bytes_read = AtomicUsize::new(0);
        iter_concurrent_limit!(
            concurrent_chunks,
            regions,
            try_for_each,
            |(index, region): (u64, &mut [u8])| {
                let rows_remaining = num_rows - index * chunk_rows;
                let chunk = progress.read(|| {
                    decode_chunk(
                        &self.store_path,
                        &self.metadata,
                        self.compressor.as_ref(),
                        index,
                        rows_remaining,
                    )
                })?;
                region.copy_from_slice(chunk.bytes());
                bytes_read.fetch_add(chunk.encoded_size(), Ordering::Relaxed);
                progress.next();
                Ok::<_, DechunkError>(())
            }
        )?;

        Ok(bytes_read.into_inner())
    }
}
