//! Error types for the abuse guard.

use thiserror::Error;

/// Main error type for abuse guard operations.
///
/// Policy denials are not errors; they are reported through
/// [`Decision`](crate::guard::Decision) and
/// [`InspectionResult`](crate::guard::InspectionResult).
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limit class name that is not one of api, auth, forms, search
    #[error("Unknown limit class: {0}")]
    InvalidLimitClass(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GuardError {
    fn from(err: ::config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

/// Result type alias for abuse guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
