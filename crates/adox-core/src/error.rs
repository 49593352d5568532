//! Unified error types for adox

use thiserror::Error;

/// Unified error type for all adox operations
///
/// This is the raw failure produced by the remote client, the filesystem and
/// argument handling. It never crosses the operation boundary directly; the
/// classifier turns it into a [`crate::ClassifiedError`].
#[derive(Error, Debug)]
pub enum AdoxError {
    // Remote errors
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload not ready: {0}")]
    NotReady(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Caller errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl AdoxError {
    /// Numeric status signal carried by this failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            AdoxError::Api { status, .. } => Some(*status),
            AdoxError::NotFound(_) => Some(404),
            AdoxError::Auth(_) => Some(401),
            _ => None,
        }
    }

    /// Message without the variant prefix added by `Display`
    pub fn raw_message(&self) -> String {
        match self {
            AdoxError::Http(msg)
            | AdoxError::NotFound(msg)
            | AdoxError::NotReady(msg)
            | AdoxError::Auth(msg)
            | AdoxError::InvalidArgument(msg)
            | AdoxError::Config(msg)
            | AdoxError::Other(msg) => msg.clone(),
            AdoxError::Api { message, .. } => message.clone(),
            AdoxError::Io(e) => e.to_string(),
            AdoxError::Serialization(e) => e.to_string(),
        }
    }
}

/// Result type alias using AdoxError
pub type Result<T> = std::result::Result<T, AdoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_signal() {
        let api = AdoxError::Api {
            status: 403,
            message: "denied".to_string(),
        };
        assert_eq!(api.status(), Some(403));
        assert_eq!(AdoxError::NotFound("x".to_string()).status(), Some(404));
        assert_eq!(AdoxError::Auth("x".to_string()).status(), Some(401));
        assert_eq!(AdoxError::Http("reset".to_string()).status(), None);
        assert_eq!(AdoxError::NotReady("x".to_string()).status(), None);
    }

    #[test]
    fn test_raw_message_strips_prefix() {
        let err = AdoxError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API error (status 500): boom");
        assert_eq!(err.raw_message(), "boom");
    }
}
