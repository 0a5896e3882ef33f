use thiserror::Error;

use crate::store::StoreError;

/// Errors returned synchronously by the queue façade.
///
/// Failures inside the running dispatch engine are never returned through
/// this type; they are published as [`crate::queue::QueueEvent`]s instead.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Backing store unreachable: {0}")]
    Connectivity(#[source] StoreError),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Channel already registered: {0}")]
    ChannelExists(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("Consumer already registered: {0}")]
    ConsumerExists(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch engine is already running")]
    AlreadyRunning,
}

impl QueueError {
    /// True for the "absent name" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChannelNotFound(_) | Self::ConsumerNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueueError::ChannelNotFound("orders".to_string());
        assert_eq!(err.to_string(), "Channel not found: orders");
        assert!(err.is_not_found());

        let err = QueueError::ConsumerExists("c1".to_string());
        assert!(err.to_string().contains("c1"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_connectivity_wraps_store_error() {
        let err = QueueError::Connectivity(StoreError::Unavailable("refused".to_string()));
        assert!(err.to_string().contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
