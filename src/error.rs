// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VqmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg/FFprobe command failed: {0}")]
    Command(String),

    #[error("Failed to parse: {0}")]
    Parse(String),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plotting error: {0}")]
    Plot(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Input error: {0}")]
    Input(String),

    /// A slice that cannot be processed (empty, too short, mismatched or misaligned planes).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Cannot collapse empty series '{0}'")]
    EmptySeries(String),
}

// Define a standard Result type for the crate
pub type Result<T> = std::result::Result<T, VqmError>;
