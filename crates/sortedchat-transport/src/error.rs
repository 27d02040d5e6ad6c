//! Errors reported by a transport implementation.

/// Failure of a call to the remote chat service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::NotFound("chat x".to_string()).to_string(),
            "not found: chat x"
        );
        assert_eq!(
            TransportError::Network("reset".to_string()).to_string(),
            "network error: reset"
        );
        assert_eq!(
            TransportError::Stream("eof".to_string()).to_string(),
            "stream error: eof"
        );
        assert_eq!(
            TransportError::Rejected("quota".to_string()).to_string(),
            "request rejected: quota"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(TransportError::NotFound(String::new()).is_not_found());
        assert!(!TransportError::Network(String::new()).is_not_found());
    }
}
