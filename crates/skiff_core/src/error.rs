//! Core error types for SKIFF.
//!
//! Every fatal condition in the workspace ends up as a [`CoreError`].
//! A paused computation is not an error and has no variant here.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Conflicting or unsupported configuration, detected before any run
    Configuration {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Peer unreachable or a malformed response
    Transport {
        /// Remote operation that failed
        operation: String,
        /// Failure description
        reason: String,
    },

    /// A bounded call exceeded its deadline
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// A stored or received snapshot failed to parse into a valid snapshot
    Deserialization {
        /// Failure description
        reason: String,
    },

    /// Execution-time fault unrelated to pausing
    EngineFault {
        /// Fault description
        reason: String,
    },

    /// Filesystem error
    Io {
        /// Path involved
        path: String,
        /// Failure description
        reason: String,
    },

    /// Illegal migration state transition
    InvalidState {
        /// State the coordinator was in
        from: String,
        /// State that was requested
        to: String,
    },

    /// Invalid encoding
    InvalidEncoding,
}

impl CoreError {
    /// Short, stable name of the error class, used as a log field
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Deserialization { .. } | Self::InvalidEncoding => "deserialization",
            Self::EngineFault { .. } => "engine_fault",
            Self::Io { .. } => "io",
            Self::InvalidState { .. } => "invalid_state",
        }
    }

    /// Shorthand for a configuration error
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => write!(f, "Configuration error: {}", reason),
            Self::Transport { operation, reason } => {
                write!(f, "Transport error during {}: {}", operation, reason)
            }
            Self::Timeout { operation } => write!(f, "Timeout: {}", operation),
            Self::Deserialization { reason } => {
                write!(f, "Snapshot deserialization failed: {}", reason)
            }
            Self::EngineFault { reason } => write!(f, "Engine fault: {}", reason),
            Self::Io { path, reason } => write!(f, "IO error on {}: {}", path, reason),
            Self::InvalidState { from, to } => {
                write!(f, "Invalid state transition: {} -> {}", from, to)
            }
            Self::InvalidEncoding => write!(f, "Invalid encoding"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<postcard::Error> for CoreError {
    fn from(err: postcard::Error) -> Self {
        Self::Deserialization {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidEncoding;
        assert_eq!(format!("{}", err), "Invalid encoding");

        let err = CoreError::config("--interactive and --snapshot-ms are exclusive");
        assert_eq!(
            format!("{}", err),
            "Configuration error: --interactive and --snapshot-ms are exclusive"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = CoreError::Transport {
            operation: "execute".to_string(),
            reason: "connection refused".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("execute"));
        assert!(s.contains("connection refused"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(CoreError::InvalidEncoding.kind(), "deserialization");
        assert_eq!(
            CoreError::EngineFault {
                reason: "trap".to_string()
            }
            .kind(),
            "engine_fault"
        );
        assert_eq!(
            CoreError::Timeout {
                operation: "finish".to_string()
            }
            .kind(),
            "timeout"
        );
    }

    #[test]
    fn test_postcard_error_is_deserialization() {
        let err: CoreError = postcard::Error::DeserializeUnexpectedEnd.into();
        assert_eq!(err.kind(), "deserialization");
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::InvalidEncoding;
        let err2 = CoreError::InvalidEncoding;
        assert_eq!(err1, err2);

        let err3 = CoreError::config("x");
        assert_ne!(err1, err3);
    }
}
