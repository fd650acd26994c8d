//! Compressors of Zarr V2 chunks.
//!
//! A compressor is identified by the numcodecs `id` in the `compressor` field of the array metadata.
//! Compressors are registered at compile time as [`CompressorPlugin`]s using the [inventory] crate, and are created from metadata with [`compressor_from_metadata`].
//!
//! Supported compressors:
//!  - `blosc`: `cname`, `clevel`, `shuffle`, `blocksize`
//!  - `zlib`: `level`
//!  - `gzip`: `level`
//!  - `zstd`: `level`, `checksum`
//!
//! An array without a compressor (`"compressor": null`) uses the [`RawCompressor`].

mod blosc_compressor;
mod compressor_error;
mod gzip_compressor;
mod zlib_compressor;
mod zstd_compressor;

use std::{fmt::Debug, sync::Arc};

pub use blosc_compressor::{BloscCompressor, BloscCompressorName, BloscShuffleMode};
pub use compressor_error::CompressorError;
pub use gzip_compressor::GzipCompressor;
pub use zlib_compressor::ZlibCompressor;
pub use zstd_compressor::ZstdCompressor;

use crate::metadata::{CompressorMetadata, DataTypeV2};

/// Compressor traits.
///
/// A compressor encodes and decodes a whole chunk.
/// The same instance is used to decode input chunks and encode the output chunk.
pub trait CompressorTraits: Debug + Send + Sync {
    /// The numcodecs identifier of the compressor.
    fn identifier(&self) -> &'static str;

    /// Encode `decoded`.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if encoding fails.
    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError>;

    /// Decode `encoded`.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if `encoded` is not valid for this compressor.
    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CompressorError>;
}

/// Creates a compressor from its metadata and the array data type.
pub type CompressorCreateFn =
    fn(&CompressorMetadata, &DataTypeV2) -> Result<Arc<dyn CompressorTraits>, CompressorError>;

/// A compressor plugin.
pub struct CompressorPlugin {
    identifier: &'static str,
    create_fn: CompressorCreateFn,
}
inventory::collect!(CompressorPlugin);

impl CompressorPlugin {
    /// Create a new plugin for registration.
    pub const fn new(identifier: &'static str, create_fn: CompressorCreateFn) -> Self {
        Self {
            identifier,
            create_fn,
        }
    }

    /// Create a compressor from `metadata`.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if the configuration is invalid.
    pub fn create(
        &self,
        metadata: &CompressorMetadata,
        data_type: &DataTypeV2,
    ) -> Result<Arc<dyn CompressorTraits>, CompressorError> {
        (self.create_fn)(metadata, data_type)
    }

    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        self.identifier
    }
}

/// Create a compressor from array compressor metadata.
///
/// The data type is needed by compressors that shuffle elements (e.g. `blosc`).
///
/// # Errors
/// Returns [`CompressorError::Unsupported`] if no registered plugin matches the `id`, or another [`CompressorError`] if the configuration is invalid.
pub fn compressor_from_metadata(
    metadata: Option<&CompressorMetadata>,
    data_type: &DataTypeV2,
) -> Result<Arc<dyn CompressorTraits>, CompressorError> {
    let Some(metadata) = metadata else {
        return Ok(Arc::new(RawCompressor));
    };
    for plugin in inventory::iter::<CompressorPlugin> {
        if plugin.identifier() == metadata.id() {
            return plugin.create(metadata, data_type);
        }
    }
    Err(CompressorError::Unsupported(metadata.id().to_string()))
}

/// Deserialize the configuration of `metadata`, mapping errors to [`CompressorError::InvalidConfiguration`].
fn configuration<T: serde::de::DeserializeOwned>(
    id: &'static str,
    metadata: &CompressorMetadata,
) -> Result<T, CompressorError> {
    metadata
        .to_configuration()
        .map_err(|err| CompressorError::InvalidConfiguration {
            id,
            reason: err.to_string(),
        })
}

/// The identity compressor, for arrays stored without compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCompressor;

impl CompressorTraits for RawCompressor {
    fn identifier(&self) -> &'static str {
        "null"
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        Ok(decoded.to_vec())
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        Ok(encoded.to_vec())
    }
}
