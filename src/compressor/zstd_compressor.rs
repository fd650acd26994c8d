//! The numcodecs `zstd` compressor.

use std::sync::Arc;

use serde::Deserialize;

use super::{configuration, CompressorError, CompressorPlugin, CompressorTraits};
use crate::metadata::{CompressorMetadata, DataTypeV2};

const IDENTIFIER: &str = "zstd";

inventory::submit! {
    CompressorPlugin::new(IDENTIFIER, create_compressor_zstd)
}

fn create_compressor_zstd(
    metadata: &CompressorMetadata,
    _data_type: &DataTypeV2,
) -> Result<Arc<dyn CompressorTraits>, CompressorError> {
    let configuration: ZstdConfiguration = configuration(IDENTIFIER, metadata)?;
    Ok(Arc::new(ZstdCompressor::new(
        configuration.level,
        configuration.checksum,
    )))
}

const fn default_level() -> i32 {
    1
}

#[derive(Deserialize, Clone, Debug)]
struct ZstdConfiguration {
    #[serde(default = "default_level")]
    level: i32,
    #[serde(default)]
    checksum: bool,
}

/// A `zstd` compressor.
///
/// Encoded frames always record the decompressed size, which numcodecs requires to decode.
#[derive(Clone, Debug)]
pub struct ZstdCompressor {
    level: i32,
    checksum: bool,
}

impl ZstdCompressor {
    /// Create a new `zstd` compressor.
    #[must_use]
    pub fn new(level: i32, checksum: bool) -> Self {
        Self { level, checksum }
    }
}

impl CompressorTraits for ZstdCompressor {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let mut compressor = zstd::bulk::Compressor::new(self.level)?;
        compressor.include_checksum(self.checksum)?;
        Ok(compressor.compress(decoded)?)
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        Ok(zstd::stream::decode_all(encoded)?)
    }
}
