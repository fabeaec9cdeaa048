//! Configuration errors shared by DevHub crates.

use std::path::PathBuf;
use thiserror::Error;

/// Errors loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid JSON5 in config: {0}")]
    Json5(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Home directory could not be determined")]
    NoHomeDir,

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
}
