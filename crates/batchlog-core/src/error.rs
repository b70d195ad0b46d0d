//! Error types for the batchlog core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for batchlog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for batchlog.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid trigger, cache or storage configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation attempted after the cache was shut down
    #[error("Cache is closed")]
    CacheClosed,

    /// Publish sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Flush task was cancelled or panicked before completing
    #[error("Flush aborted: {0}")]
    FlushAborted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Publish sink errors.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Destination could not be verified or created
    #[error("Provisioning failed for {destination}: {message}")]
    Provisioning {
        destination: String,
        message: String,
    },

    /// Batch could not be committed to the destination
    #[error("Transfer failed for {key}: {message}")]
    Transfer { key: String, message: String },
}

impl Error {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "config",
            Error::CacheClosed => "closed",
            Error::Sink(SinkError::Provisioning { .. }) => "provisioning",
            Error::Sink(SinkError::Transfer { .. }) => "transfer",
            Error::FlushAborted(_) => "aborted",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidConfiguration(err.to_string())
    }
}
