//! Error types shared by the detection and calibration core.
//!
//! Only caller mistakes are raised. Degenerate numeric input (all-zero
//! signals, singular regressions) resolves to sentinel results, and
//! non-physical sizes are filtered, so neither has a variant here.

/// Result type for core operations
pub type SpResult<T> = Result<T, SpError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpError {
    /// Invalid parameters; fatal for the run that supplied them.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing or malformed data for a single sample.
    #[error("data error: {0}")]
    Data(String),
}

impl SpError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        SpError::Configuration(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        SpError::Data(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SpError::Configuration(_))
    }
}
