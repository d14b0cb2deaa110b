//! Error types shared across the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by core types and configuration loading.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be read.
    #[error("Config read failed: {0}")]
    ConfigRead(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Config parse failed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
