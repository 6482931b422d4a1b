//! Errors shared by the configuration layer

use thiserror::Error;

/// Error for configuration loading and validation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using the shared Error.
pub type Result<T> = std::result::Result<T, Error>;
