use thiserror::Error;

/// Top-level error type shared by the sortedchat crates.
///
/// Subsystem crates define their own error enums and convert into this one
/// at the composition root so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SortedChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl From<toml::de::Error> for SortedChatError {
    fn from(err: toml::de::Error) -> Self {
        SortedChatError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SortedChatError {
    fn from(err: toml::ser::Error) -> Self {
        SortedChatError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SortedChatError {
    fn from(err: serde_json::Error) -> Self {
        SortedChatError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for sortedchat operations.
pub type Result<T> = std::result::Result<T, SortedChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SortedChatError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = SortedChatError::Session("no chat".to_string());
        assert_eq!(err.to_string(), "Session error: no chat");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SortedChatError = io_err.into();
        assert!(matches!(err, SortedChatError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: SortedChatError = toml_err.into();
        assert!(matches!(err, SortedChatError::Config(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SortedChatError = json_err.into();
        assert!(matches!(err, SortedChatError::Serialization(_)));
    }
}
