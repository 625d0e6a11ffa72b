//! Errors of the data, session and batch layer.

use spcore::SpError;

pub type TrackResult<T> = Result<T, TrackError>;

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error(transparent)]
    Core(#[from] SpError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed delimited-text input, `line` is 1-based.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("batch cancelled")]
    Cancelled,
}

impl TrackError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        TrackError::Parse { line, message: message.into() }
    }

    /// configuration errors abort a batch, everything else only fails its sample
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackError::Core(e) if e.is_configuration()) || matches!(self, TrackError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(TrackError::from(SpError::configuration("bad alpha")).is_fatal());
        assert!(TrackError::Cancelled.is_fatal());
        assert!(!TrackError::from(SpError::data("empty")).is_fatal());
        assert!(!TrackError::parse(3, "not a number").is_fatal());
        assert_eq!(TrackError::parse(3, "x").to_string(), "parse error at line 3: x");
    }
}
