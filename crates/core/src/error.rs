//! Error types shared by the frame pipeline crates.

use thiserror::Error;

/// Error raised while loading or validating pipeline configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or schema errors
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values that parse but cannot drive a frame pipeline
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
