//! Error types for flat-file loading and configuration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Faults raised while reading or interpreting local inputs.
///
/// A missing file is not one of these: readers report it as `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("TOML error in {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Well-formed document with the wrong shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
