use std::path::PathBuf;

use thiserror::Error;

/// An array metadata error.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read array metadata {_0:?}: {_1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    #[error("unsupported zarr_format {_0}, expected 2")]
    UnsupportedFormat(u64),
    #[error("invalid data type {_0:?}: {_1}")]
    InvalidDataType(String, String),
    #[error("chunks {chunks:?} are incompatible with shape {shape:?}: {reason}")]
    InvalidChunks {
        chunks: Vec<u64>,
        shape: Vec<u64>,
        reason: &'static str,
    },
    #[error("{_0}")]
    Other(String),
}
