//! Error types for recmux-mp4.

use crate::fourcc::FourCc;
use crate::frame::FrameType;
use crate::metadata::TrackKind;
use thiserror::Error;

/// Result type for recmux-mp4 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for recmux-mp4 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid encoder or muxer parameters.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Required track metadata is missing or unusable.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Serialization defect; bytes already emitted may be corrupt.
    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),

    /// Malformed box data handed to the inspector.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// A collaborator was canceled instead of producing data.
    #[error("Encoding was cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a metadata error.
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Whether the error is a muxing defect that must abort the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Mux(_))
    }
}

/// Muxing defects. None of these are retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MuxError {
    /// `write()` emitted a different number of bytes than `generate()` promised.
    #[error("'{tag}' wrote {written} bytes but generated {expected}")]
    SizeMismatch {
        tag: FourCc,
        expected: u64,
        written: u64,
    },

    /// `write()` was called on a node that was never generated.
    #[error("'{0}' written before generate()")]
    NotGenerated(FourCc),

    /// A box grew beyond its 32-bit size field.
    #[error("'{tag}' size {size} does not fit its size field")]
    SizeOverflow { tag: FourCc, size: u64 },

    /// An offset or count does not fit the width of its field.
    #[error("{field} value {value} exceeds its field width")]
    OffsetOverflow { field: &'static str, value: u64 },

    /// Byte data was written, or a box ended, with a partial byte pending.
    #[error("Bit writer not byte aligned ({bits} pending bits)")]
    Unaligned { bits: u32 },

    /// Frame type that no track can carry.
    #[error("Unsupported frame type: {0:?}")]
    UnsupportedFrame(FrameType),

    /// Frame routed to a track that was never configured.
    #[error("No {0} track configured")]
    UnknownTrack(TrackKind),

    /// Codec configuration needed for the sample description is absent.
    #[error("Missing codec configuration for {0} track")]
    MissingCodecConfig(TrackKind),

    /// A late-bound field was never resolved before `write()`.
    #[error("Unresolved slot for {0}")]
    UnresolvedSlot(&'static str),

    /// Operation not valid in the writer's current state.
    #[error("Invalid writer state: {0}")]
    InvalidState(String),
}
