//! Snapshot persistence to the local filesystem.

use crate::artifact::Envelope;
use skiff_core::{CoreError, CoreResult, Snapshot};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A snapshot read back from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    /// Program the snapshot was captured from
    pub program: String,
    /// Hex BLAKE3 checksum of the payload
    pub checksum: String,
    /// Artifact size in bytes
    pub size: u64,
    /// Decoded snapshot
    pub snapshot: Snapshot,
}

impl StoredSnapshot {
    /// Fail unless the artifact belongs to `program`
    ///
    /// # Errors
    ///
    /// Returns a configuration error on mismatch
    pub fn ensure_program(&self, program: &str) -> CoreResult<()> {
        if self.program != program {
            return Err(CoreError::config(format!(
                "snapshot was captured from program {:?}, not {:?}",
                self.program, program
            )));
        }
        Ok(())
    }
}

/// Snapshot artifact at a fixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Bind to a path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Artifact path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if an artifact exists at the path
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `snapshot` atomically, replacing any existing artifact
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails or the filesystem rejects the write
    pub fn write(&self, program: &str, snapshot: &Snapshot) -> CoreResult<u64> {
        let bytes = Envelope::seal(program, snapshot)?.to_bytes()?;
        let tmp = self.temp_path();

        let result = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_error(e));
        }

        tracing::info!(
            path = %self.path.display(),
            program,
            frames = snapshot.depth(),
            bytes = bytes.len(),
            "snapshot written"
        );
        Ok(bytes.len() as u64)
    }

    /// Read and verify the artifact
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Deserialization` if its
    /// contents are not a valid artifact
    pub fn read(&self) -> CoreResult<StoredSnapshot> {
        let bytes = fs::read(&self.path).map_err(|e| self.io_error(e))?;
        let envelope = Envelope::from_bytes(&bytes)?;
        let snapshot = envelope.open()?;

        tracing::debug!(
            path = %self.path.display(),
            program = %envelope.program,
            frames = snapshot.depth(),
            "snapshot read"
        );
        Ok(StoredSnapshot {
            checksum: envelope.checksum_hex(),
            program: envelope.program,
            size: bytes.len() as u64,
            snapshot,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "snapshot".into(), |n| n.to_string_lossy().into_owned());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn io_error(&self, err: std::io::Error) -> CoreError {
        CoreError::Io {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }
}
