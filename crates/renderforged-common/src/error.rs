//! Common error types used throughout renderforged.

use std::path::PathBuf;

/// Common error type for renderforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A parameter key is not present in any layer.
    #[error("{params} params have no key {key}")]
    MissingKey { params: String, key: String },

    /// A parameter is present but has the wrong shape.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// A required file or directory does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A parameter file has an extension we cannot read.
    #[error("unsupported parameter file: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// A JSON document failed to parse or convert.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML document failed to parse.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn missing_key(params: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingKey {
            params: params.into(),
            key: key.into(),
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
