//! Error types for the share count engine

use thiserror::Error;

/// Result type alias for share count operations
pub type Result<T> = std::result::Result<T, CountError>;

/// Error types that can occur while fetching, storing or managing counts
#[derive(Error, Debug, Clone)]
pub enum CountError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Unknown count group '{slug}' on item {item}")]
    UnknownGroup { item: String, slug: String },

    #[error("Count group '{0}' is managed automatically and cannot be changed")]
    ProtectedGroup(String),

    #[error("Operation not supported for {0}")]
    Unsupported(String),

    #[error("No share count source configured")]
    NoCountSource,

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for CountError {
    fn from(err: std::io::Error) -> Self {
        CountError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CountError {
    fn from(err: serde_json::Error) -> Self {
        CountError::Serialization(err.to_string())
    }
}

impl CountError {
    /// Whether a refresh pass that failed with this error may succeed later
    /// without operator action.
    ///
    /// Storage and IO failures are usually transient (a locked file, a full
    /// disk being cleaned up). Configuration and validation errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            CountError::Storage(_) => true,
            CountError::IoError(_) => true,
            CountError::HttpError(_) => true,

            CountError::ConfigError(_) => false,
            CountError::Serialization(_) => false,
            CountError::InvalidUrl(_) => false,
            CountError::UnknownItem(_) => false,
            CountError::UnknownGroup { .. } => false,
            CountError::ProtectedGroup(_) => false,
            CountError::Unsupported(_) => false,
            CountError::NoCountSource => false,
        }
    }

    /// Create a storage error from anything displayable
    pub fn storage(message: impl std::fmt::Display) -> Self {
        CountError::Storage(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CountError::storage("disk full").is_transient());
        assert!(CountError::HttpError("HTTP 503".to_string()).is_transient());
        assert!(!CountError::NoCountSource.is_transient());
        assert!(!CountError::ProtectedGroup("http".to_string()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: CountError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, CountError::IoError(ref msg) if msg.contains("boom")));
    }

    #[test]
    fn test_display_messages() {
        let err = CountError::UnknownGroup {
            item: "42".to_string(),
            slug: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown count group 'abc' on item 42");
        assert_eq!(
            CountError::HttpError("HTTP 404".to_string()).to_string(),
            "HTTP error: HTTP 404"
        );
    }
}
