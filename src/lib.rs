//! Recmux - incremental fragmented MP4 recording
//!
//! Wires track encoders to the fragmented MP4 muxer in `recmux-mp4`. This
//! library crate exposes the orchestrator and encoder adapters for the
//! binary and for integration testing.

pub mod adts;
pub mod config;
pub mod encoder;
pub mod orchestrator;

pub use encoder::{channel_encoder, ChannelEncoder, EncoderConfig, EncoderHandle, TrackEncoder};
pub use orchestrator::{EncodedOutput, EncoderState, MediaEncoder};
