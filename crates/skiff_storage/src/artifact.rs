//! Artifact envelope.
//!
//! Layout: the four bytes `SKIF`, then a postcard-encoded [`Envelope`].
//! The envelope carries the program name the snapshot was captured from and
//! a BLAKE3 checksum of the encoded snapshot.

use serde::{Deserialize, Serialize};
use skiff_core::{CoreError, CoreResult, Snapshot};

/// Leading bytes of every artifact
pub const MAGIC: [u8; 4] = *b"SKIF";

/// Current envelope format version
pub const FORMAT_VERSION: u32 = 1;

/// Artifact decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    /// Input does not start with the artifact magic
    #[error("not a snapshot artifact (bad magic)")]
    BadMagic,

    /// Envelope written by an unknown format version
    #[error("unsupported artifact format version {found}")]
    UnsupportedVersion {
        /// Version found in the envelope
        found: u32,
    },

    /// Payload does not hash to the recorded checksum
    #[error("checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch {
        /// Hex checksum stored in the envelope
        recorded: String,
        /// Hex checksum of the payload
        computed: String,
    },

    /// Envelope or payload could not be decoded
    #[error("malformed artifact: {0}")]
    Malformed(String),
}

impl From<ArtifactError> for CoreError {
    fn from(err: ArtifactError) -> Self {
        CoreError::Deserialization {
            reason: err.to_string(),
        }
    }
}

/// Checksummed snapshot container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope format version
    pub format_version: u32,
    /// Program the snapshot belongs to
    pub program: String,
    /// BLAKE3 of `payload`
    pub checksum: [u8; 32],
    /// `Snapshot::encode` output
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encode a snapshot and seal it with its checksum
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be encoded
    pub fn seal(program: impl Into<String>, snapshot: &Snapshot) -> CoreResult<Self> {
        let payload = snapshot.encode()?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            program: program.into(),
            checksum: *blake3::hash(&payload).as_bytes(),
            payload,
        })
    }

    /// Verify the checksum and decode the snapshot
    ///
    /// # Errors
    ///
    /// Returns error on checksum mismatch or a malformed payload
    pub fn open(&self) -> Result<Snapshot, ArtifactError> {
        let computed = blake3::hash(&self.payload);
        if computed.as_bytes() != &self.checksum {
            return Err(ArtifactError::ChecksumMismatch {
                recorded: hex::encode(self.checksum),
                computed: computed.to_hex().to_string(),
            });
        }
        Snapshot::decode(&self.payload).map_err(|e| ArtifactError::Malformed(e.to_string()))
    }

    /// Hex form of the checksum
    #[must_use]
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Serialize with the leading magic
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut out = MAGIC.to_vec();
        let body = postcard::to_stdvec(self).map_err(|_| CoreError::InvalidEncoding)?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse bytes produced by [`Envelope::to_bytes`]
    ///
    /// # Errors
    ///
    /// Returns error on bad magic, unsupported version or malformed data
    pub fn from_bytes(data: &[u8]) -> Result<Self, ArtifactError> {
        let body = data.strip_prefix(&MAGIC[..]).ok_or(ArtifactError::BadMagic)?;
        let (envelope, rest): (Self, _) =
            postcard::take_from_bytes(body).map_err(|e| ArtifactError::Malformed(e.to_string()))?;
        if !rest.is_empty() {
            return Err(ArtifactError::Malformed(format!(
                "{} trailing bytes after envelope",
                rest.len()
            )));
        }
        if envelope.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: envelope.format_version,
            });
        }
        Ok(envelope)
    }
}
