//! SKIFF Storage
//!
//! Snapshot artifacts: a checksummed envelope around an encoded
//! [`skiff_core::Snapshot`], and atomic persistence of that envelope to disk.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod file;

pub use artifact::{ArtifactError, Envelope, FORMAT_VERSION, MAGIC};
pub use file::{SnapshotFile, StoredSnapshot};
