//! Result and error types for Espejo

use thiserror::Error;

/// Result type for Espejo operations
pub type EspejoResult<T> = Result<T, EspejoError>;

/// Errors that can occur in Espejo
#[derive(Debug, Error)]
pub enum EspejoError {
    /// Submission configuration rejected before any scheduling
    #[error("Invalid configuration: {message}")]
    ConfigInvalid {
        /// Error message
        message: String,
    },

    /// Current capture and baseline do not share dimensions
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Baseline dimensions as `WxH`
        expected: String,
        /// Capture dimensions as `WxH`
        actual: String,
    },

    /// No approved baseline for the screen/profile pair
    #[error("No baseline for screen {screen_id} on {profile}")]
    MissingBaseline {
        /// Screen identifier
        screen_id: String,
        /// Device profile key
        profile: String,
    },

    /// Infrastructure failure reported by the UI driver or probe
    #[error("Transient infrastructure failure: {message}")]
    InfraTransient {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Image decoding or encoding error
    #[error("Image processing failed: {message}")]
    ImageProcessing {
        /// Error message
        message: String,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl EspejoError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Create a transient infrastructure error
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::InfraTransient {
            message: message.into(),
        }
    }

    /// Create an image processing error
    #[must_use]
    pub fn image(message: impl Into<String>) -> Self {
        Self::ImageProcessing {
            message: message.into(),
        }
    }

    /// Whether the error is attributable to infrastructure rather than the artifact under test
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::InfraTransient { .. } | Self::Timeout { .. })
    }
}
