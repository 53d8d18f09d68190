//! Snapshot of a paused computation.
//!
//! A snapshot is the ordered call-frame sequence of a paused stack, innermost
//! frame first. It is immutable once captured and is consumed by exactly one
//! resume, which is why [`crate::Engine::resume`] takes it by value.

use crate::error::{CoreError, CoreResult};
use crate::frame::{CallFrame, FunctionIndex};
use serde::{Deserialize, Serialize};

/// Snapshot of a paused call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `false` is the "no snapshot, start fresh" sentinel
    pub valid: bool,
    /// Frames, innermost first
    pub frames: Vec<CallFrame>,
    /// Function the paused computation was originally invoked through
    pub entry_function_index: FunctionIndex,
}

impl Snapshot {
    /// The "start fresh" sentinel
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            frames: Vec::new(),
            entry_function_index: FunctionIndex(0),
        }
    }

    /// Build a valid snapshot from frames ordered innermost first
    ///
    /// # Errors
    ///
    /// Returns error if `frames` is empty
    pub fn capture(frames: Vec<CallFrame>, entry_function_index: FunctionIndex) -> CoreResult<Self> {
        if frames.is_empty() {
            return Err(CoreError::EngineFault {
                reason: "cannot capture a snapshot without frames".to_string(),
            });
        }
        Ok(Self {
            valid: true,
            frames,
            entry_function_index,
        })
    }

    /// Check if this snapshot can be resumed
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of captured frames
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The frame that was executing when the trigger fired
    #[must_use]
    pub fn innermost(&self) -> Option<&CallFrame> {
        self.frames.first()
    }

    /// The frame of the originally invoked function
    #[must_use]
    pub fn outermost(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Check the structural invariants
    ///
    /// # Errors
    ///
    /// Returns error if a valid snapshot has no frames or an invalid one has some
    pub fn check(&self) -> CoreResult<()> {
        match (self.valid, self.frames.is_empty()) {
            (true, true) => Err(CoreError::Deserialization {
                reason: "valid snapshot without frames".to_string(),
            }),
            (false, false) => Err(CoreError::Deserialization {
                reason: "invalid snapshot carries frames".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Encode snapshot to its transferable binary form
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        postcard::to_stdvec(self).map_err(|_| CoreError::InvalidEncoding)
    }

    /// Decode snapshot from bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are malformed, have trailing data, or
    /// decode to a snapshot that violates the invariants
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let (snapshot, rest): (Self, &[u8]) = postcard::take_from_bytes(data)?;
        if !rest.is_empty() {
            return Err(CoreError::Deserialization {
                reason: format!("{} trailing bytes after snapshot", rest.len()),
            });
        }
        snapshot.check()?;
        Ok(snapshot)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::invalid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Word;
    use proptest::prelude::*;

    fn sample() -> Snapshot {
        Snapshot::capture(
            vec![
                CallFrame::new(FunctionIndex(1), 5).with_locals(vec![3]).with_operands(vec![2]),
                CallFrame::new(FunctionIndex(1), 9).with_locals(vec![4]).with_operands(vec![]),
                CallFrame::new(FunctionIndex(0), 2).with_locals(vec![9]),
            ],
            FunctionIndex(0),
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_invalid() {
        let snapshot = Snapshot::invalid();
        assert!(!snapshot.is_valid());
        assert_eq!(snapshot.depth(), 0);
        assert!(snapshot.check().is_ok());
        assert_eq!(Snapshot::default(), snapshot);
    }

    #[test]
    fn test_snapshot_capture_requires_frames() {
        assert!(Snapshot::capture(Vec::new(), FunctionIndex(0)).is_err());
    }

    #[test]
    fn test_snapshot_innermost_outermost() {
        let snapshot = sample();
        assert_eq!(snapshot.innermost().unwrap().program_counter, 5);
        assert_eq!(snapshot.outermost().unwrap().function_index, FunctionIndex(0));
    }

    #[test]
    fn test_snapshot_encode_decode() {
        let snapshot = sample();
        let encoded = snapshot.encode().unwrap();
        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_snapshot_decode_rejects_trailing_bytes() {
        let mut encoded = sample().encode().unwrap();
        encoded.push(0);
        let err = Snapshot::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), "deserialization");
    }

    #[test]
    fn test_snapshot_decode_rejects_truncated() {
        let encoded = sample().encode().unwrap();
        assert!(Snapshot::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Snapshot::decode(&[]).is_err());
    }

    #[test]
    fn test_snapshot_decode_rejects_broken_invariant() {
        let broken = Snapshot {
            valid: true,
            frames: Vec::new(),
            entry_function_index: FunctionIndex(0),
        };
        let encoded = postcard::to_stdvec(&broken).unwrap();
        assert!(Snapshot::decode(&encoded).is_err());
    }

    fn arb_frame() -> impl Strategy<Value = CallFrame> {
        (
            any::<u32>(),
            0u32..64,
            prop::collection::vec(any::<Word>(), 0..8),
            prop::collection::vec(any::<Word>(), 0..8),
        )
            .prop_map(|(pc, func, locals, operands)| {
                CallFrame::new(FunctionIndex(func), pc)
                    .with_locals(locals)
                    .with_operands(operands)
            })
    }

    proptest! {
        #[test]
        fn prop_snapshot_roundtrip(
            frames in prop::collection::vec(arb_frame(), 1..16),
            entry in 0u32..64,
        ) {
            let snapshot = Snapshot::capture(frames, FunctionIndex(entry)).unwrap();
            let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, snapshot);
        }
    }
}
