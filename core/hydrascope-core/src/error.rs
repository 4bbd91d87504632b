//! Error types for hydrascope-core operations.
//!
//! Transport failures never escape the connection layer (they feed the
//! reconnect loop instead); these variants cover the places where a caller
//! genuinely has to decide what to do.

use std::path::PathBuf;

/// All errors that can occur in hydrascope-core operations.
#[derive(Debug, thiserror::Error)]
pub enum HydraError {
    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────
    #[error("Transport error: {0}")]
    Transport(String),

    /// The message could not be framed; the transport itself is fine.
    #[error("Message cannot be framed: {0}")]
    Encode(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Storage
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage not initialized; call init() first")]
    NotInitialized,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid URL {url}: {details}")]
    InvalidUrl { url: String, details: String },

    #[error("Invalid hydration report: {0}")]
    InvalidReport(String),
}

/// Convenience type alias for Results using HydraError.
pub type Result<T> = std::result::Result<T, HydraError>;

impl From<HydraError> for String {
    fn from(err: HydraError) -> String {
        err.to_string()
    }
}
