//! Error types for the medkeep_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medkeep_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input rejected before any persistence
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inventory consistency error (unknown medicine/batch, over-draw)
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// Store write failure; aborts only the affected transaction
    #[error("Persistence error: {0}")]
    Persistence(String),
}
