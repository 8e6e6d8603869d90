//! Error types for credential loading

/// Errors from gathering and validating credential bundles.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credential survived loading. Fatal at startup.
    #[error("no usable credentials configured")]
    NoCredentials,

    #[error("credential parse error: {0}")]
    Parse(String),

    #[error("invalid credential configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
