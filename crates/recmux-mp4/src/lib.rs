//! Recmux-MP4: incremental fragmented MP4 production for live recording.
//!
//! This crate turns already-compressed audio/video frames into a fragmented
//! ISO base-media byte stream without buffering the whole file. Output leaves
//! in units that can be appended to a file or socket as soon as they exist.
//!
//! # Modules
//!
//! - `boxes` - ISO box tree with the two-phase generate/write protocol
//! - `descriptor` - MPEG-4 elementary stream descriptors embedded in `esds`
//! - `compositor` - Output buffer, bit packer and offset bookkeeping
//! - `fragment` - Per-track queue of pending samples and flush policy
//! - `writer` - Header / fragment / index state machine
//! - `inspect` - Read-back of produced box trees
//!
//! # Output layout
//!
//! ```text
//! ftyp moov            (header, once)
//! moof mdat            (one unit per flushed track fragment, repeated)
//! mfra                 (random access index, once)
//! ```
//!
//! Every box is built fresh for each unit: `generate()` computes sizes for
//! the whole tree, late-bound fields are resolved through [`Slot`]s, then
//! `write()` serializes into the [`Compositor`] with a size check around
//! every node.

pub mod avc;
pub mod boxes;
pub mod compositor;
pub mod descriptor;
pub mod error;
pub mod fourcc;
pub mod fragment;
pub mod frame;
pub mod inspect;
pub mod metadata;
pub mod writer;

pub use boxes::{MuxBox, MuxNode, Slot};
pub use compositor::Compositor;
pub use error::{Error, MuxError, Result};
pub use fourcc::FourCc;
pub use fragment::FragmentBuffer;
pub use frame::{EncodedFrame, FrameType};
pub use metadata::{AudioMetadata, TrackKind, TrackMetadata, VideoMetadata};
pub use writer::{ContainerWriter, IsoMediaWriter, MuxerConfig, WriteFlags, WriterState};
