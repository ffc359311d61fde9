//! Client errors

use std::time::Duration;

/// Errors surfaced by suspending session and conversation operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No matching reply arrived within the window
    #[error("Timeout: no reply to {operation} within {}s", .waited.as_secs_f32())]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    /// The underlying transport failed to open or reported an error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted without its precondition
    #[error("State error: {0}")]
    State(String),

    /// A reply arrived but could not be used
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    pub(crate) fn timeout(operation: &'static str, waited: Duration) -> Self {
        ClientError::Timeout { operation, waited }
    }

    /// Whether the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let err = ClientError::timeout("createConversation", Duration::from_secs(10));
        assert_eq!(
            err.to_string(),
            "Timeout: no reply to createConversation within 10s"
        );
        assert!(err.is_timeout());

        let err = ClientError::State("connection not established".to_string());
        assert_eq!(err.to_string(), "State error: connection not established");
        assert!(!err.is_timeout());
    }
}
