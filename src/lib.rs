#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod compressor;
pub mod dechunk;
pub mod metadata;
pub mod progress;

pub use dechunk::{DechunkError, DechunkOptions, DechunkSummary, Dechunker};

/// The `zarrs_dechunk` version.
///
/// Example:
/// `zarrs_dechunk 0.1.0`
pub const ZARRS_DECHUNK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convert the Zarr V2 array at `store_path` into a single chunk array.
///
/// This is [`Dechunker::open`] followed by [`Dechunker::dechunk`].
///
/// # Errors
/// Returns a [`DechunkError`] if the array cannot be opened or converted.
pub fn dechunk<P: AsRef<std::path::Path>>(
    store_path: P,
    options: &DechunkOptions,
    progress_callback: &progress::ProgressCallback,
) -> Result<DechunkSummary, DechunkError> {
    Dechunker::open(store_path)?.dechunk(options, progress_callback)
}
