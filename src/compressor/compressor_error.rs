use thiserror::Error;

/// A compressor creation, encoding or decoding error.
#[derive(Debug, Error)]
pub enum CompressorError {
    #[error("compressor {_0} is not supported")]
    Unsupported(String),
    #[error("invalid {id} compressor configuration: {reason}")]
    InvalidConfiguration { id: &'static str, reason: String },
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error("{_0}")]
    Other(String),
}

impl From<&str> for CompressorError {
    fn from(err_string: &str) -> Self {
        Self::Other(err_string.to_string())
    }
}

impl From<String> for CompressorError {
    fn from(err_string: String) -> Self {
        Self::Other(err_string)
    }
}
