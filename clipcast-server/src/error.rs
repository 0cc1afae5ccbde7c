//! Error types for clipcast-server
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation, plus the mapping onto the transport-agnostic status codes
//! carried in command responses.

use clipcast_common::api::status;
use thiserror::Error;

/// Main error type for clipcast-server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Request failed validation (empty name, bad extension, bad range)
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Client-referenced node unknown to the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// The root node may not be edited, moved, or deleted
    #[error("Root is protected: {0}")]
    RootProtected(String),

    /// File I/O errors (upload temp file, move into place)
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio sink errors
    #[error("Audio sink error: {0}")]
    Sink(String),

    /// Speech recognition errors
    #[error("Speech error: {0}")]
    Speech(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transport-agnostic status code for command responses.
    pub fn status(&self) -> u16 {
        match self {
            Error::Invalid(_) => status::INVALID,
            Error::NotFound(_) => status::NOT_FOUND,
            Error::RootProtected(_) => status::ROOT_PROTECTED,
            Error::Io(_) => status::IO,
            _ => status::INTERNAL,
        }
    }
}

/// Convenience Result type using clipcast-server Error
pub type Result<T> = std::result::Result<T, Error>;
