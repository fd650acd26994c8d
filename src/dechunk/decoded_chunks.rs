use std::path::{Path, PathBuf};

use crate::{compressor::CompressorTraits, metadata::ArrayMetadata};

use super::DechunkError;

/// A decoded chunk, truncated to the rows it holds of the array.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    index: u64,
    bytes: Vec<u8>,
    rows: u64,
    encoded_size: usize,
}

impl DecodedChunk {
    /// The chunk index along the leading axis.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The decoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The number of rows along the leading axis.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// The size of the chunk file.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read and decode the chunk at `index`, keeping at most `rows_remaining` rows.
///
/// The chunk must decode to a whole number of rows, and to at least `min(chunk_rows, rows_remaining)` rows.
/// Extra rows (padding of the final chunk) are discarded.
pub(crate) fn decode_chunk(
    store_path: &Path,
    metadata: &ArrayMetadata,
    compressor: &dyn CompressorTraits,
    index: u64,
    rows_remaining: u64,
) -> Result<DecodedChunk, DechunkError> {
    let path = store_path.join(metadata.chunk_key(index));
    let chunk_read_error = |path: PathBuf, reason: String| DechunkError::ChunkRead {
        index,
        path,
        reason,
    };

    let encoded = std::fs::read(&path).map_err(|err| chunk_read_error(path.clone(), err.to_string()))?;
    let mut bytes = compressor
        .decode(&encoded)
        .map_err(|err| chunk_read_error(path.clone(), err.to_string()))?;

    let row_size = metadata.row_size();
    if bytes.len() % row_size != 0 {
        return Err(chunk_read_error(
            path,
            format!(
                "decoded to {} bytes, which is not a multiple of the row size ({row_size} bytes)",
                bytes.len()
            ),
        ));
    }

    let rows = (bytes.len() / row_size) as u64;
    let expected = std::cmp::min(metadata.chunk_rows(), rows_remaining);
    if rows < expected {
        return Err(DechunkError::ChunkShapeMismatch {
            index,
            expected,
            actual: rows,
        });
    }
    bytes.truncate(usize::try_from(expected).unwrap_or(usize::MAX) * row_size);
    log::debug!(
        "decoded chunk {index}: {} bytes -> {} rows",
        encoded.len(),
        expected
    );

    Ok(DecodedChunk {
        index,
        bytes,
        rows: expected,
        encoded_size: encoded.len(),
    })
}

/// An iterator over the decoded chunks of an array, in ascending index order.
///
/// Created by [`Dechunker::decoded_chunks`](super::Dechunker::decoded_chunks).
/// The iterator is single pass and ends after the first error.
pub struct DecodedChunks<'a> {
    store_path: &'a Path,
    metadata: &'a ArrayMetadata,
    compressor: &'a dyn CompressorTraits,
    index: u64,
    num_chunks: u64,
    rows_remaining: u64,
    failed: bool,
}

impl<'a> DecodedChunks<'a> {
    pub(crate) fn new(
        store_path: &'a Path,
        metadata: &'a ArrayMetadata,
        compressor: &'a dyn CompressorTraits,
    ) -> Self {
        Self {
            store_path,
            metadata,
            compressor,
            index: 0,
            num_chunks: metadata.num_chunks(),
            rows_remaining: metadata.num_rows(),
            failed: false,
        }
    }

    /// The number of rows not yet yielded.
    #[must_use]
    pub fn rows_remaining(&self) -> u64 {
        self.rows_remaining
    }
}

impl Iterator for DecodedChunks<'_> {
    type Item = Result<DecodedChunk, DechunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index == self.num_chunks {
            return None;
        }
        let index = self.index;
        self.index += 1;

        let chunk = decode_chunk(
            self.store_path,
            self.metadata,
            self.compressor,
            index,
            self.rows_remaining,
        );
        match &chunk {
            Ok(chunk) => self.rows_remaining -= chunk.rows(),
            Err(_) => self.failed = true,
        }
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            let remaining = usize::try_from(self.num_chunks - self.index).unwrap_or(usize::MAX);
            (0, Some(remaining))
        }
    }
}

impl std::iter::FusedIterator for DecodedChunks<'_> {}
