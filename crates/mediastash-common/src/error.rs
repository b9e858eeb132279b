//! Common error types used throughout mediastash.
//!
//! One enum covers the failure cases every layer shares: fetch failures,
//! buffering timeouts, unsatisfiable ranges, bad input, external tool
//! failures and I/O. The HTTP layer maps each variant to a status code via
//! [`Error::http_status`].

use std::time::Duration;

/// Common error type for mediastash.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The upstream fetch for a cache key failed.
    #[error("Fetch failed for {key}: {message}")]
    Fetch { key: String, message: String },

    /// Not enough bytes were buffered before the wait deadline.
    #[error("Timed out after {waited:?} waiting for {key} to buffer")]
    BufferTimeout { key: String, waited: Duration },

    /// The requested byte range starts beyond what is available.
    #[error("Range not satisfiable ({available} bytes available)")]
    RangeNotSatisfiable { available: u64 },

    /// The requested item was not found.
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// An external tool (yt-dlp, ffmpeg) failed or could not be run.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The service is shutting down and refuses new work.
    #[error("Shutting down")]
    ShuttingDown,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Fetch error.
    pub fn fetch<K: ToString, S: Into<String>>(key: K, message: S) -> Self {
        Self::Fetch {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new Tool error.
    pub fn tool<T: Into<String>, S: Into<String>>(tool: T, message: S) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::RangeNotSatisfiable { .. } => 416,
            Self::Tool { .. } => 502,
            Self::Fetch { .. } | Self::BufferTimeout { .. } | Self::ShuttingDown => 503,
            Self::Io(_) | Self::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch_failed",
            Self::BufferTimeout { .. } => "buffer_timeout",
            Self::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Tool { .. } => "tool_failed",
            Self::Io(_) => "io",
            Self::ShuttingDown => "shutting_down",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
