//! Transport errors.

use skiff_core::CoreError;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Peer could not be reached
    #[error("{operation}: connection failed: {reason}")]
    Connection {
        /// Remote operation
        operation: String,
        /// Failure description
        reason: String,
    },

    /// Peer did not answer in time
    #[error("{operation}: request timeout after {after_ms}ms")]
    Timeout {
        /// Remote operation
        operation: String,
        /// Deadline in milliseconds
        after_ms: u64,
    },

    /// Peer answered with a non-success status
    #[error("{operation}: peer answered {status}: {body}")]
    Status {
        /// Remote operation
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response text, if any
        body: String,
    },

    /// Message could not be encoded or decoded
    #[error("{operation}: codec error: {reason}")]
    Codec {
        /// Remote operation
        operation: String,
        /// Failure description
        reason: String,
    },

    /// Listener could not be bound or the server failed
    #[error("server error on {address}: {reason}")]
    Server {
        /// Bound or requested address
        address: String,
        /// Failure description
        reason: String,
    },

    /// Peer address is not usable
    #[error("invalid peer address {0:?}")]
    InvalidAddress(String),
}

impl TransportError {
    /// Remote operation this error belongs to, if any
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Connection { operation, .. }
            | Self::Timeout { operation, .. }
            | Self::Status { operation, .. }
            | Self::Codec { operation, .. } => Some(operation),
            Self::Server { .. } | Self::InvalidAddress(_) => None,
        }
    }

    pub(crate) fn codec(operation: &str, reason: impl ToString) -> Self {
        Self::Codec {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { operation, .. } => CoreError::Timeout { operation },
            TransportError::InvalidAddress(_) => CoreError::Configuration {
                reason: err.to_string(),
            },
            other => CoreError::Transport {
                operation: other.operation().unwrap_or("serve").to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_timeout() {
        let err: CoreError = TransportError::Timeout {
            operation: "execute".to_string(),
            after_ms: 10_000,
        }
        .into();
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_status_maps_to_transport() {
        let err: CoreError = TransportError::Status {
            operation: "finish".to_string(),
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().contains("finish"));
    }

    #[test]
    fn test_invalid_address_is_configuration() {
        let err: CoreError = TransportError::InvalidAddress("::::".to_string()).into();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_operation() {
        assert_eq!(TransportError::codec("execute", "bad").operation(), Some("execute"));
        assert_eq!(
            TransportError::Server {
                address: "127.0.0.1:1".to_string(),
                reason: "in use".to_string()
            }
            .operation(),
            None
        );
    }
}
