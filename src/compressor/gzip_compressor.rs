//! The numcodecs `gzip` compressor.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::Deserialize;

use super::{configuration, CompressorError, CompressorPlugin, CompressorTraits};
use crate::metadata::{CompressorMetadata, DataTypeV2};

const IDENTIFIER: &str = "gzip";

inventory::submit! {
    CompressorPlugin::new(IDENTIFIER, create_compressor_gzip)
}

fn create_compressor_gzip(
    metadata: &CompressorMetadata,
    _data_type: &DataTypeV2,
) -> Result<Arc<dyn CompressorTraits>, CompressorError> {
    let configuration: GzipConfiguration = configuration(IDENTIFIER, metadata)?;
    Ok(Arc::new(GzipCompressor::new(configuration.level)?))
}

const fn default_level() -> u32 {
    1
}

#[derive(Deserialize, Clone, Debug)]
struct GzipConfiguration {
    #[serde(default = "default_level")]
    level: u32,
}

/// A `gzip` compressor.
#[derive(Clone, Debug)]
pub struct GzipCompressor {
    compression: Compression,
}

impl GzipCompressor {
    /// Create a new `gzip` compressor.
    ///
    /// # Errors
    /// Returns [`CompressorError::InvalidConfiguration`] if `level` exceeds 9.
    pub fn new(level: u32) -> Result<Self, CompressorError> {
        if level > 9 {
            return Err(CompressorError::InvalidConfiguration {
                id: IDENTIFIER,
                reason: format!("level {level} is not in 0..=9"),
            });
        }
        Ok(Self {
            compression: Compression::new(level),
        })
    }
}

impl CompressorTraits for GzipCompressor {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression);
        encoder.write_all(decoded)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let mut decoder = GzDecoder::new(encoded);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded)?;
        Ok(decoded)
    }
}
