//! Wire Decoder
//!
//! Parses a single Jetstream frame into an [`Envelope`]. Pure: no I/O, no
//! shared state, so one codec value is reused for every message on every
//! connection.
//!
//! Frames arrive as UTF-8 JSON text. Binary frames are accepted as long as
//! they also carry JSON. Compressed subscriptions are refused before
//! connecting, but a stray zstd frame is still recognized by its magic
//! number and rejected with [`DecodeError::Compressed`], since decoding it
//! needs the server's custom dictionary.

use crate::domain::envelope::Envelope;

/// Leading bytes of a zstd frame.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Errors raised while decoding a wire frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not well-formed JSON of the envelope shape.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// A required routing field is empty.
    #[error("envelope is missing required field `{0}`")]
    MissingField(&'static str),

    /// The frame is zstd-compressed.
    #[error("compressed frame ({0} bytes) cannot be decoded without the server dictionary")]
    Compressed(usize),
}

/// JSON codec for Jetstream frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the frame is not JSON, lacks the `did`,
    /// `kind` or `time_us` fields, or is compressed.
    pub fn decode(&self, frame: &[u8]) -> Result<Envelope, DecodeError> {
        if frame.starts_with(&ZSTD_MAGIC) {
            return Err(DecodeError::Compressed(frame.len()));
        }

        let envelope: Envelope = serde_json::from_slice(frame)?;

        if envelope.did.is_empty() {
            return Err(DecodeError::MissingField("did"));
        }
        if envelope.kind.is_empty() {
            return Err(DecodeError::MissingField("kind"));
        }

        Ok(envelope)
    }
}
