//! Pull-based driver tying track encoders to a container writer.
//!
//! [`MediaEncoder::get_encoded_data`] is the single entry point. Each call
//! performs at most one pull cycle and returns whatever container bytes it
//! produced, so the caller decides how often to poll and where the bytes go.

use crate::encoder::TrackEncoder;
use bytes::Bytes;
use recmux_mp4::writer::MIME_AUDIO_MP4;
use recmux_mp4::{
    ContainerWriter, Error, IsoMediaWriter, MuxerConfig, Result, TrackKind, WriteFlags,
};
use std::fmt;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    AwaitMetadata,
    EncodingTrack,
    Done,
    Error,
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitMetadata => write!(f, "await-metadata"),
            Self::EncodingTrack => write!(f, "encoding-track"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Container bytes produced by one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    /// Buffers in file order; concatenating every buffer of every call
    /// yields the complete file.
    pub buffers: Vec<Bytes>,
    pub mime_type: &'static str,
}

impl EncodedOutput {
    fn empty(mime_type: &'static str) -> Self {
        Self {
            buffers: Vec::new(),
            mime_type,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(|b| b.is_empty())
    }

    /// Total byte count across all buffers.
    pub fn len(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }
}

struct Source {
    encoder: Box<dyn TrackEncoder>,
    kind: Option<TrackKind>,
    ended: bool,
}

/// Drives a set of track encoders through a [`ContainerWriter`].
pub struct MediaEncoder {
    writer: Box<dyn ContainerWriter>,
    sources: Vec<Source>,
    state: EncoderState,
}

impl MediaEncoder {
    /// Muxes `encoders` into a fragmented MP4 stream.
    pub fn new(config: MuxerConfig, encoders: Vec<Box<dyn TrackEncoder>>) -> Result<Self> {
        let writer = IsoMediaWriter::new(config)?;
        Self::with_writer(Box::new(writer), encoders)
    }

    pub fn with_writer(
        writer: Box<dyn ContainerWriter>,
        encoders: Vec<Box<dyn TrackEncoder>>,
    ) -> Result<Self> {
        if encoders.is_empty() {
            return Err(Error::config("at least one track encoder is required"));
        }
        let sources = encoders
            .into_iter()
            .map(|encoder| Source {
                encoder,
                kind: None,
                ended: false,
            })
            .collect();
        Ok(Self {
            writer,
            sources,
            state: EncoderState::AwaitMetadata,
        })
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Whether the stream is finished and every byte was handed out.
    pub fn is_done(&self) -> bool {
        self.state == EncoderState::Done
    }

    /// MIME type of the produced stream. Only final once metadata is known.
    pub fn mime_type(&self) -> &'static str {
        if self.state == EncoderState::AwaitMetadata {
            MIME_AUDIO_MP4
        } else {
            self.writer.mime_type()
        }
    }

    fn set_state(&mut self, state: EncoderState) {
        tracing::debug!(from = %self.state, to = %state, "Media encoder state change");
        self.state = state;
    }

    /// Run one pull cycle and return the container bytes it produced.
    ///
    /// The first failure moves the encoder to [`EncoderState::Error`] and is
    /// returned once; later calls return empty output. Once
    /// [`EncoderState::Done`] is reached calls return empty output as well.
    pub async fn get_encoded_data(&mut self) -> Result<EncodedOutput> {
        let result = match self.state {
            EncoderState::AwaitMetadata => self.await_metadata().await,
            EncoderState::EncodingTrack => self.encode_tracks().await,
            EncoderState::Done | EncoderState::Error => {
                return Ok(EncodedOutput::empty(self.mime_type()));
            }
        };

        match result {
            Ok(buffers) => Ok(EncodedOutput {
                buffers,
                mime_type: self.mime_type(),
            }),
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(error = %e, "Muxing failed, output is unusable");
                } else {
                    tracing::warn!(error = %e, "Media encoding stopped");
                }
                self.set_state(EncoderState::Error);
                Err(e)
            }
        }
    }

    async fn await_metadata(&mut self) -> Result<Vec<Bytes>> {
        for source in &mut self.sources {
            let metadata = source.encoder.metadata().await?;
            source.kind = Some(metadata.kind());
            self.writer.set_metadata(metadata)?;
        }
        let buffers = self.writer.get_container_data()?;
        self.set_state(EncoderState::EncodingTrack);
        Ok(buffers)
    }

    async fn encode_tracks(&mut self) -> Result<Vec<Bytes>> {
        for source in self.sources.iter_mut().filter(|s| !s.ended) {
            let frames = source.encoder.encoded_track().await?;
            let complete = source.encoder.is_complete();
            if frames.is_empty() && !complete {
                continue;
            }

            let flags = match (complete, source.kind) {
                (true, Some(kind)) => WriteFlags::end_of_stream(kind),
                _ => WriteFlags::NONE,
            };
            tracing::trace!(
                track = ?source.kind,
                frames = frames.len(),
                end_of_stream = complete,
                "Forwarding encoded frames"
            );
            self.writer.write_encoded_track(frames, flags)?;
            source.ended = complete;
        }

        let buffers = self.writer.get_container_data()?;
        if self.writer.is_writing_complete() {
            self.set_state(EncoderState::Done);
        }
        Ok(buffers)
    }
}

impl fmt::Debug for MediaEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEncoder")
            .field("state", &self.state)
            .field("tracks", &self.sources.len())
            .finish()
    }
}
