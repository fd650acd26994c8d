use std::path::PathBuf;

use thiserror::Error;

use crate::{compressor::CompressorError, metadata::MetadataError};

/// A dechunking error.
///
/// The staging directory is always removed before an error is returned, so the input array is left as it was found.
/// The exception is [`DechunkError::ReplaceInterrupted`], where the input array must be recovered from `backup`.
#[derive(Debug, Error)]
pub enum DechunkError {
    #[error("{_0:?} is not a Zarr V2 array, .zarray is missing")]
    NotAStore(PathBuf),
    #[error(transparent)]
    MetadataError(#[from] MetadataError),
    #[error(transparent)]
    CompressorError(#[from] CompressorError),
    #[error("failed to read chunk {index} at {path:?}: {reason}")]
    ChunkRead {
        index: u64,
        path: PathBuf,
        reason: String,
    },
    #[error("chunk {index} decoded to {actual} rows, expected at least {expected}")]
    ChunkShapeMismatch { index: u64, expected: u64, actual: u64 },
    #[error("chunks decoded to {actual} rows, expected {expected}")]
    ShapeMismatch { expected: u64, actual: u64 },
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error("replace was interrupted, the original array is at {backup:?}: {source}")]
    ReplaceInterrupted {
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{_0}")]
    Other(String),
}
