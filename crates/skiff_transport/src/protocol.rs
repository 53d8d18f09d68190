//! Wire messages.
//!
//! Every body is a postcard-encoded message sent as
//! `application/octet-stream`.

use crate::error::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skiff_core::{CoreResult, SessionId, Snapshot};

/// Snapshot hand-off endpoint
pub const EXECUTE_PATH: &str = "/v1/execute";
/// Completion notice endpoint
pub const FINISH_PATH: &str = "/v1/finish";
/// Liveness endpoint
pub const HEALTH_PATH: &str = "/v1/health";

/// Largest accepted message body
pub const MAX_MESSAGE_BYTES: usize = 1 << 30;

/// Body content type
pub const CONTENT_TYPE: &str = "application/octet-stream";

/// Ask the peer to continue (or start) a computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Migration session
    pub session_id: SessionId,
    /// Program the computation belongs to
    pub program: String,
    /// Snapshot to resume; `None` or an invalid snapshot starts fresh
    pub snapshot: Option<Snapshot>,
}

impl ExecuteRequest {
    /// Hand over a paused computation
    #[must_use]
    pub fn resume(session_id: SessionId, program: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            session_id,
            program: program.into(),
            snapshot: Some(snapshot),
        }
    }

    /// Ask the peer to start from the beginning
    #[must_use]
    pub fn start(session_id: SessionId, program: impl Into<String>) -> Self {
        Self {
            session_id,
            program: program.into(),
            snapshot: None,
        }
    }

    /// Check the carried snapshot's structural invariants
    ///
    /// # Errors
    ///
    /// Returns `Deserialization` if the snapshot is malformed
    pub fn check(&self) -> CoreResult<()> {
        match &self.snapshot {
            Some(snapshot) => snapshot.check(),
            None => Ok(()),
        }
    }

    /// The snapshot to resume, if it is usable
    #[must_use]
    pub fn resumable(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref().filter(|s| s.is_valid())
    }
}

/// Whether the peer accepted the hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// True when the peer has taken over the computation
    pub ok: bool,
}

/// Tell the peer the computation has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishRequest {
    /// Migration session
    pub session_id: SessionId,
}

/// Acknowledgement of [`FinishRequest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishResponse {}

/// Encode a message
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode<T: Serialize>(operation: &str, message: &T) -> Result<Vec<u8>, TransportError> {
    postcard::to_stdvec(message).map_err(|e| TransportError::codec(operation, e))
}

/// Decode a message, rejecting trailing bytes
///
/// # Errors
///
/// Returns error if the bytes are not exactly one `T`
pub fn decode<T: DeserializeOwned>(operation: &str, data: &[u8]) -> Result<T, TransportError> {
    let (message, rest) =
        postcard::take_from_bytes::<T>(data).map_err(|e| TransportError::codec(operation, e))?;
    if !rest.is_empty() {
        return Err(TransportError::codec(
            operation,
            format!("{} trailing bytes", rest.len()),
        ));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::{CallFrame, FunctionIndex};

    #[test]
    fn test_execute_request_resumable() {
        let session = SessionId::new();
        assert!(ExecuteRequest::start(session, "fib").resumable().is_none());
        assert!(
            ExecuteRequest::resume(session, "fib", Snapshot::invalid())
                .resumable()
                .is_none()
        );

        let snapshot =
            Snapshot::capture(vec![CallFrame::new(FunctionIndex(0), 3)], FunctionIndex(0)).unwrap();
        let request = ExecuteRequest::resume(session, "fib", snapshot.clone());
        assert_eq!(request.resumable(), Some(&snapshot));
        assert_eq!(request.program, "fib");
    }

    #[test]
    fn test_execute_request_check() {
        let session = SessionId::new();
        assert!(ExecuteRequest::start(session, "fib").check().is_ok());
        assert!(ExecuteRequest::resume(session, "fib", Snapshot::invalid()).check().is_ok());

        let empty = Snapshot {
            valid: true,
            frames: Vec::new(),
            entry_function_index: FunctionIndex(0),
        };
        let err = ExecuteRequest::resume(session, "fib", empty).check().unwrap_err();
        assert_eq!(err.kind(), "deserialization");

        let stale = Snapshot {
            valid: false,
            frames: vec![CallFrame::new(FunctionIndex(0), 3)],
            entry_function_index: FunctionIndex(0),
        };
        let err = ExecuteRequest::resume(session, "fib", stale).check().unwrap_err();
        assert_eq!(err.kind(), "deserialization");
    }

    #[test]
    fn test_decode_execute_request() {
        let request = ExecuteRequest::start(SessionId::new(), "fib");
        let bytes = encode("execute", &request).unwrap();
        assert_eq!(decode::<ExecuteRequest>("execute", &bytes).unwrap(), request);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<ExecuteRequest>("execute", &[0xff; 3]).unwrap_err();
        assert_eq!(err.operation(), Some("execute"));
    }

    #[test]
    fn test_decode_rejects_trailing() {
        let mut bytes = encode("finish", &FinishRequest { session_id: SessionId::new() }).unwrap();
        bytes.push(1);
        assert!(decode::<FinishRequest>("finish", &bytes).is_err());
    }

    #[test]
    fn test_finish_response_is_empty() {
        assert!(encode("finish", &FinishResponse {}).unwrap().is_empty());
    }
}
