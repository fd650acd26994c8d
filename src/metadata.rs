//! Zarr V2 array metadata.
//!
//! The `.zarray` sidecar of a Zarr V2 array, for example:
//! ```json
//! {
//!     "chunks": [
//!         3
//!     ],
//!     "compressor": {
//!         "blocksize": 0,
//!         "clevel": 5,
//!         "cname": "lz4",
//!         "id": "blosc",
//!         "shuffle": 1
//!     },
//!     "dtype": "<u2",
//!     "fill_value": 0,
//!     "filters": null,
//!     "order": "C",
//!     "shape": [
//!         10
//!     ],
//!     "zarr_format": 2
//! }
//! ```

mod data_type;
mod metadata_error;

use std::{collections::BTreeMap, path::Path};

use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};

pub use data_type::{ByteOrder, DataTypeV2};
pub use metadata_error::MetadataError;

/// The name of the array metadata file in a Zarr V2 store.
pub const ARRAY_METADATA_KEY: &str = ".zarray";

/// The only supported `zarr_format`.
pub const ZARR_FORMAT: u64 = 2;

/// The layout of bytes within each chunk.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArrayOrder {
    /// Row-major.
    C,
    /// Column-major.
    F,
}

/// The separator between chunk indices in a chunk key.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ChunkKeySeparator {
    #[default]
    #[serde(rename = ".")]
    Dot,
    #[serde(rename = "/")]
    Slash,
}

impl ChunkKeySeparator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Dot => ".",
            Self::Slash => "/",
        }
    }
}

/// The compressor of a Zarr V2 array: a numcodecs `id` and its parameters.
///
/// The parameters are kept verbatim so the output chunk uses the same configuration.
/// Keys are serialised in sorted order, `id` included.
#[derive(Deserialize, Clone, PartialEq, Debug)]
pub struct CompressorMetadata {
    id: String,
    #[serde(flatten)]
    configuration: serde_json::Map<String, serde_json::Value>,
}

impl CompressorMetadata {
    /// Create compressor metadata from an `id` and its parameters.
    #[must_use]
    pub fn new(id: &str, configuration: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: id.to_string(),
            configuration,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The compressor parameters (all fields other than `id`).
    #[must_use]
    pub fn configuration(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.configuration
    }

    /// Deserialize the parameters into a typed configuration.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if the parameters do not match `T`.
    pub fn to_configuration<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(self.configuration.clone()))
    }
}

impl Serialize for CompressorMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let id = serde_json::Value::from(self.id.as_str());
        let fields: BTreeMap<&str, &serde_json::Value> = self
            .configuration
            .iter()
            .map(|(key, value)| (key.as_str(), value))
            .chain(std::iter::once(("id", &id)))
            .collect();
        fields.serialize(serializer)
    }
}

/// Deserialize a field that is present, keeping an explicit `null` distinct from an absent field.
fn deserialize_present<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Zarr V2 array metadata.
///
/// Fields are declared in key order so that serialisation is canonical.
/// `fill_value`, `filters` and any unrecognised fields are passed through untouched.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ArrayMetadata {
    chunks: Vec<u64>,
    compressor: Option<CompressorMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dimension_separator: Option<ChunkKeySeparator>,
    dtype: DataTypeV2,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    fill_value: Option<serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    filters: Option<serde_json::Value>,
    order: ArrayOrder,
    shape: Vec<u64>,
    zarr_format: u64,
    #[serde(flatten)]
    additional_fields: serde_json::Map<String, serde_json::Value>,
}

impl ArrayMetadata {
    /// Create and validate array metadata.
    ///
    /// # Errors
    /// Returns a [`MetadataError`] if the metadata is invalid.
    pub fn new(
        shape: Vec<u64>,
        chunks: Vec<u64>,
        dtype: DataTypeV2,
        compressor: Option<CompressorMetadata>,
        order: ArrayOrder,
    ) -> Result<Self, MetadataError> {
        let metadata = Self {
            chunks,
            compressor,
            dimension_separator: None,
            dtype,
            fill_value: Some(serde_json::Value::from(0)),
            filters: Some(serde_json::Value::Null),
            order,
            shape,
            zarr_format: ZARR_FORMAT,
            additional_fields: serde_json::Map::new(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Read and validate the array metadata at `path` (a `.zarray` file).
    ///
    /// # Errors
    /// Returns a [`MetadataError`] if the file cannot be read, is not valid JSON, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, MetadataError> {
        let json = std::fs::read_to_string(path)
            .map_err(|err| MetadataError::Read(path.to_path_buf(), err))?;
        Self::from_json(&json)
    }

    /// Parse and validate array metadata from a JSON string.
    ///
    /// # Errors
    /// Returns a [`MetadataError`] if `json` is not valid JSON or fails validation.
    pub fn from_json(json: &str) -> Result<Self, MetadataError> {
        let metadata: Self = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }

    fn validate(&self) -> Result<(), MetadataError> {
        if self.zarr_format != ZARR_FORMAT {
            return Err(MetadataError::UnsupportedFormat(self.zarr_format));
        }
        let invalid_chunks = |reason| MetadataError::InvalidChunks {
            chunks: self.chunks.clone(),
            shape: self.shape.clone(),
            reason,
        };
        if self.shape.is_empty() {
            return Err(invalid_chunks("zero-dimensional arrays are not supported"));
        }
        if self.chunks.len() != self.shape.len() {
            return Err(invalid_chunks("dimensionality mismatch"));
        }
        if self.chunks.contains(&0) {
            return Err(invalid_chunks("chunk lengths must be positive"));
        }
        if self.chunks[1..] != self.shape[1..] {
            return Err(invalid_chunks(
                "only the leading axis may be chunked, trailing chunk lengths must match the shape",
            ));
        }
        if self.checked_row_size().is_none() {
            return Err(invalid_chunks("the size of a row exceeds usize::MAX"));
        }
        if self.shape.len() > 1 && self.order == ArrayOrder::F {
            return Err(MetadataError::Other(
                "column-major order is only supported for one-dimensional arrays".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialise to pretty printed JSON with a 4 space indent (as written by `zarr-python`).
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if serialisation fails.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        self.serialize(&mut serializer)?;
        Ok(json)
    }

    /// Return a copy of this metadata with a single chunk spanning the leading axis.
    ///
    /// An empty leading axis keeps a chunk length of 1, since chunk lengths must be positive.
    #[must_use]
    pub fn with_single_chunk(&self) -> Self {
        let mut metadata = self.clone();
        metadata.chunks[0] = std::cmp::max(self.shape[0], 1);
        metadata
    }

    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    #[must_use]
    pub fn chunks(&self) -> &[u64] {
        &self.chunks
    }

    #[must_use]
    pub fn data_type(&self) -> &DataTypeV2 {
        &self.dtype
    }

    #[must_use]
    pub fn order(&self) -> ArrayOrder {
        self.order
    }

    #[must_use]
    pub fn compressor(&self) -> Option<&CompressorMetadata> {
        self.compressor.as_ref()
    }

    #[must_use]
    pub fn fill_value(&self) -> Option<&serde_json::Value> {
        self.fill_value.as_ref()
    }

    #[must_use]
    pub fn filters(&self) -> Option<&serde_json::Value> {
        self.filters.as_ref()
    }

    fn checked_row_elements(&self) -> Option<u64> {
        self.shape[1..]
            .iter()
            .try_fold(1u64, |elements, &length| elements.checked_mul(length))
    }

    /// The size of one row in bytes, or [`None`] if it overflows or is zero.
    fn checked_row_size(&self) -> Option<usize> {
        self.checked_row_elements()
            .and_then(|elements| usize::try_from(elements).ok())
            .and_then(|elements| elements.checked_mul(self.dtype.size()))
            .filter(|&size| size > 0)
    }

    /// The number of elements in one row (a single index of the leading axis).
    #[must_use]
    pub fn row_elements(&self) -> u64 {
        self.checked_row_elements().unwrap_or(u64::MAX)
    }

    /// The size of one row in bytes.
    ///
    /// Validated metadata always has a positive row size that fits in [`usize`].
    #[must_use]
    pub fn row_size(&self) -> usize {
        self.checked_row_size().unwrap_or(usize::MAX)
    }

    /// The size of the array in bytes, or [`None`] if it exceeds [`usize::MAX`].
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        usize::try_from(self.num_rows())
            .ok()
            .and_then(|rows| rows.checked_mul(self.row_size()))
    }

    /// The number of rows of the leading axis.
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        self.shape[0]
    }

    /// The number of rows in a full chunk.
    #[must_use]
    pub fn chunk_rows(&self) -> u64 {
        self.chunks[0]
    }

    /// The number of chunks along the leading axis.
    #[must_use]
    pub fn num_chunks(&self) -> u64 {
        self.shape[0].div_ceil(self.chunks[0])
    }

    /// The store key of the chunk at `index` along the leading axis.
    #[must_use]
    pub fn chunk_key(&self, index: u64) -> String {
        let separator = self.dimension_separator.unwrap_or_default().as_str();
        std::iter::once(index)
            .chain(std::iter::repeat(0).take(self.shape.len() - 1))
            .join(separator)
    }
}
