//! The numcodecs `blosc` compressor, using the bundled c-blosc library.

use std::{
    ffi::{c_int, c_void, CStr},
    sync::Arc,
};

use blosc_src::{
    blosc_cbuffer_validate, blosc_compress_ctx, blosc_decompress_ctx, blosc_get_complib_info,
    BLOSC_MAX_OVERHEAD,
};
use serde::Deserialize;

use super::{configuration, CompressorError, CompressorPlugin, CompressorTraits};
use crate::metadata::{CompressorMetadata, DataTypeV2};

const IDENTIFIER: &str = "blosc";

inventory::submit! {
    CompressorPlugin::new(IDENTIFIER, create_compressor_blosc)
}

fn create_compressor_blosc(
    metadata: &CompressorMetadata,
    data_type: &DataTypeV2,
) -> Result<Arc<dyn CompressorTraits>, CompressorError> {
    let configuration: BloscConfigurationNumcodecs = configuration(IDENTIFIER, metadata)?;
    let shuffle = BloscShuffleMode::from_numcodecs(configuration.shuffle, data_type.size())?;
    Ok(Arc::new(BloscCompressor::new(
        configuration.cname,
        configuration.clevel,
        shuffle,
        configuration.blocksize,
        data_type.size(),
    )?))
}

/// The internal compressor used by blosc.
#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum BloscCompressorName {
    #[serde(rename = "blosclz")]
    BloscLZ,
    #[serde(rename = "lz4")]
    LZ4,
    #[serde(rename = "lz4hc")]
    LZ4HC,
    #[serde(rename = "snappy")]
    Snappy,
    #[serde(rename = "zlib")]
    Zlib,
    #[serde(rename = "zstd")]
    Zstd,
}

impl BloscCompressorName {
    fn as_cstr(self) -> &'static CStr {
        match self {
            Self::BloscLZ => c"blosclz",
            Self::LZ4 => c"lz4",
            Self::LZ4HC => c"lz4hc",
            Self::Snappy => c"snappy",
            Self::Zlib => c"zlib",
            Self::Zstd => c"zstd",
        }
    }
}

/// Blosc shuffle modes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BloscShuffleMode {
    NoShuffle = 0,
    Shuffle = 1,
    BitShuffle = 2,
}

impl BloscShuffleMode {
    /// Resolve a numcodecs shuffle mode.
    ///
    /// `-1` (auto) selects bit shuffling for single byte elements and byte shuffling otherwise.
    fn from_numcodecs(shuffle: i8, typesize: usize) -> Result<Self, CompressorError> {
        match shuffle {
            -1 if typesize == 1 => Ok(Self::BitShuffle),
            -1 | 1 => Ok(Self::Shuffle),
            0 => Ok(Self::NoShuffle),
            2 => Ok(Self::BitShuffle),
            _ => Err(CompressorError::InvalidConfiguration {
                id: IDENTIFIER,
                reason: format!("shuffle {shuffle} is not one of -1, 0, 1, 2"),
            }),
        }
    }
}

const fn default_cname() -> BloscCompressorName {
    BloscCompressorName::LZ4
}

const fn default_clevel() -> u8 {
    5
}

const fn default_shuffle() -> i8 {
    1
}

/// Configuration parameters of the numcodecs `blosc` compressor.
#[derive(Deserialize, Clone, Debug)]
struct BloscConfigurationNumcodecs {
    #[serde(default = "default_cname")]
    cname: BloscCompressorName,
    #[serde(default = "default_clevel")]
    clevel: u8,
    #[serde(default = "default_shuffle")]
    shuffle: i8,
    /// Automatically determined if 0.
    #[serde(default)]
    blocksize: usize,
}

/// A `blosc` compressor.
#[derive(Clone, Debug)]
pub struct BloscCompressor {
    cname: BloscCompressorName,
    clevel: u8,
    shuffle: BloscShuffleMode,
    blocksize: usize,
    typesize: usize,
}

impl BloscCompressor {
    /// Create a new `blosc` compressor.
    ///
    /// # Errors
    /// Returns [`CompressorError`] if `clevel` exceeds 9 or `cname` is not available in the linked c-blosc.
    pub fn new(
        cname: BloscCompressorName,
        clevel: u8,
        shuffle: BloscShuffleMode,
        blocksize: usize,
        typesize: usize,
    ) -> Result<Self, CompressorError> {
        if clevel > 9 {
            return Err(CompressorError::InvalidConfiguration {
                id: IDENTIFIER,
                reason: format!("clevel {clevel} is not in 0..=9"),
            });
        }

        // Check that the compressor is available
        let support = unsafe {
            blosc_get_complib_info(
                cname.as_cstr().as_ptr(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if support < 0 {
            return Err(CompressorError::InvalidConfiguration {
                id: IDENTIFIER,
                reason: format!("cname {cname:?} is not supported"),
            });
        }

        Ok(Self {
            cname,
            clevel,
            shuffle,
            blocksize,
            typesize: std::cmp::max(typesize, 1),
        })
    }

    /// Returns the uncompressed size of `encoded` if it is a valid blosc buffer.
    fn validate(encoded: &[u8]) -> Option<usize> {
        let mut destsize: usize = 0;
        let status = unsafe {
            blosc_cbuffer_validate(
                encoded.as_ptr().cast::<c_void>(),
                encoded.len(),
                std::ptr::addr_of_mut!(destsize),
            )
        };
        (status == 0).then_some(destsize)
    }
}

impl CompressorTraits for BloscCompressor {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let destsize = decoded.len() + BLOSC_MAX_OVERHEAD as usize;
        let mut dest: Vec<u8> = Vec::with_capacity(destsize);
        let written = unsafe {
            blosc_compress_ctx(
                c_int::from(self.clevel),
                self.shuffle as c_int,
                self.typesize,
                decoded.len(),
                decoded.as_ptr().cast::<c_void>(),
                dest.as_mut_ptr().cast::<c_void>(),
                destsize,
                self.cname.as_cstr().as_ptr(),
                self.blocksize,
                1,
            )
        };
        match usize::try_from(written) {
            Ok(written) if written > 0 => {
                // SAFETY: blosc initialised the first `written` bytes of `dest`
                unsafe { dest.set_len(written) };
                dest.shrink_to_fit();
                Ok(dest)
            }
            _ => Err(CompressorError::Other(format!(
                "blosc encoding failed with status {written}"
            ))),
        }
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let destsize = Self::validate(encoded)
            .ok_or_else(|| CompressorError::from("blosc encoded value is invalid"))?;
        let mut dest: Vec<u8> = Vec::with_capacity(destsize);
        let read = unsafe {
            blosc_decompress_ctx(
                encoded.as_ptr().cast::<c_void>(),
                dest.as_mut_ptr().cast::<c_void>(),
                destsize,
                1,
            )
        };
        match usize::try_from(read) {
            Ok(read) if read == destsize => {
                // SAFETY: blosc initialised the first `read` bytes of `dest`
                unsafe { dest.set_len(read) };
                Ok(dest)
            }
            _ => Err(CompressorError::Other(format!(
                "blosc decoding failed with status {read}"
            ))),
        }
    }
}
