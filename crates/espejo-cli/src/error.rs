//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Espejo library error
    #[error("Espejo error: {0}")]
    Espejo(#[from] espejo::EspejoError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = CliError::config("missing suite");
        assert_eq!(err.to_string(), "Configuration error: missing suite");
    }

    #[test]
    fn test_invalid_argument() {
        let err = CliError::invalid_argument("bad region");
        assert!(err.to_string().contains("bad region"));
    }

    #[test]
    fn test_from_espejo() {
        let err: CliError = espejo::EspejoError::config("slots").into();
        assert!(matches!(err, CliError::Espejo(_)));
        assert_eq!(
            err.to_string(),
            "Espejo error: Invalid configuration: slots"
        );
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let err: CliError = io.into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
