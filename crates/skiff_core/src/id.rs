//! Identifiers for SKIFF migrations.
//!
//! IDs are UUIDs and are serialized in canonical format.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Session identifier - correlates a snapshot hand-off with its completion notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("session_").unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_session_id_display_parse() {
        let id = SessionId::from_bytes([7u8; 16]);
        let text = id.to_string();
        assert!(text.starts_with("session_"));
        assert_eq!(text.parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn test_session_id_parse_bare_uuid() {
        let id = SessionId::new();
        let parsed: SessionId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
