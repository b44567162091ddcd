#![forbid(unsafe_code)]

//! Common error type for Weir crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeirError {
    /// I/O related failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing failures.
    #[error("Config parse error: {0}")]
    ConfigParse(toml::de::Error),
}

/// Convenient alias for results throughout Weir crates.
pub type WeirResult<T> = Result<T, WeirError>;
