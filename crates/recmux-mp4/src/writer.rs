//! Container writer: sequences header, fragments and the random access index.

use crate::boxes::fragment::FragmentUnit;
use crate::boxes::index::{RandomAccessEntry, RandomAccessIndex};
use crate::boxes::movie::{movie_box, FtypBox};
use crate::boxes::serialize;
use crate::compositor::Compositor;
use crate::error::{Error, MuxError, Result};
use crate::frame::EncodedFrame;
use crate::metadata::{TrackKind, TrackMetadata};
use bytes::Bytes;
use std::fmt;

/// Default fragment duration in seconds.
pub const DEFAULT_FRAGMENT_DURATION_SECS: u32 = 10;

pub const MIME_AUDIO_MP4: &str = "audio/mp4";
pub const MIME_VIDEO_MP4: &str = "video/mp4";

/// Muxer settings, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxerConfig {
    /// Target duration of one fragment.
    pub fragment_duration_secs: u32,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            fragment_duration_secs: DEFAULT_FRAGMENT_DURATION_SECS,
        }
    }
}

impl MuxerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fragment_duration_secs == 0 {
            return Err(Error::config("fragment duration must be at least 1 second"));
        }
        Ok(())
    }
}

/// Flags accompanying a batch passed to [`ContainerWriter::write_encoded_track`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    end_of_stream: Option<TrackKind>,
}

impl WriteFlags {
    pub const NONE: Self = Self {
        end_of_stream: None,
    };

    /// The batch is the last one of the `kind` track.
    pub fn end_of_stream(kind: TrackKind) -> Self {
        Self {
            end_of_stream: Some(kind),
        }
    }

    pub fn end_of_stream_track(&self) -> Option<TrackKind> {
        self.end_of_stream
    }
}

/// Writer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Header,
    Fragment,
    FinalIndex,
    Done,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Header => "header",
            Self::Fragment => "fragment",
            Self::FinalIndex => "final-index",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A container backend driven by the encoder orchestrator.
pub trait ContainerWriter: Send {
    /// Register a track. Only valid before the header is produced.
    fn set_metadata(&mut self, metadata: TrackMetadata) -> Result<()>;

    /// Queue a batch of frames and produce every unit that became due.
    fn write_encoded_track(&mut self, frames: Vec<EncodedFrame>, flags: WriteFlags) -> Result<()>;

    /// Take the units produced since the previous call, in file order.
    fn get_container_data(&mut self) -> Result<Vec<Bytes>>;

    /// Whether every unit, including the index, has been handed out.
    fn is_writing_complete(&self) -> bool;

    fn mime_type(&self) -> &'static str;
}

/// Fragmented ISO base-media writer.
///
/// Output leaves as one buffer per unit: `ftyp`+`moov`, then one
/// `moof`+`mdat` per flushed track fragment, then `mfra`.
pub struct IsoMediaWriter {
    config: MuxerConfig,
    compositor: Compositor,
    state: WriterState,
    output: Vec<Bytes>,
    complete_reported: bool,
}

impl IsoMediaWriter {
    pub fn new(config: MuxerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            compositor: Compositor::new(),
            state: WriterState::Header,
            output: Vec::new(),
            complete_reported: false,
        })
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    fn set_state(&mut self, state: WriterState) {
        tracing::debug!(from = %self.state, to = %state, "Container writer state change");
        self.state = state;
    }

    /// Reject the whole batch before anything is queued.
    fn validate_batch(&self, frames: &[EncodedFrame], flags: WriteFlags) -> Result<()> {
        if self.compositor.tracks().is_empty() {
            return Err(Error::metadata("no track metadata set"));
        }
        for frame in frames {
            let kind = frame
                .frame_type
                .track_kind()
                .ok_or(MuxError::UnsupportedFrame(frame.frame_type))?;
            if self.compositor.track(kind).is_none() {
                return Err(MuxError::UnknownTrack(kind).into());
            }
        }
        if let Some(kind) = flags.end_of_stream_track() {
            if self.compositor.track(kind).is_none() {
                return Err(MuxError::UnknownTrack(kind).into());
            }
        }
        Ok(())
    }

    fn all_tracks_ended(&self) -> bool {
        self.compositor
            .tracks()
            .iter()
            .all(|t| t.buffer.is_end_of_stream())
    }

    /// Emit `ftyp` + `moov` once every sample entry can be built. Returns
    /// whether the header was written.
    fn try_write_header(&mut self) -> Result<bool> {
        if self.compositor.tracks().is_empty() {
            return Err(Error::metadata("no track metadata set"));
        }
        let missing_video_config = self
            .compositor
            .track(TrackKind::Video)
            .is_some_and(|t| t.buffer.codec_config().is_none());
        if missing_video_config {
            if self.all_tracks_ended() {
                return Err(MuxError::MissingCodecConfig(TrackKind::Video).into());
            }
            tracing::debug!("Deferring header until video codec config arrives");
            return Ok(false);
        }

        let mut ftyp = FtypBox::for_tracks(self.compositor.has_video_track());
        let mut moov = movie_box(&self.compositor)?;
        serialize(&mut ftyp, &mut self.compositor)?;
        serialize(&mut moov, &mut self.compositor)?;

        let header = self.compositor.take_output();
        tracing::info!(
            bytes = header.len(),
            tracks = self.compositor.tracks().len(),
            "Wrote container header"
        );
        self.output.push(header);
        self.set_state(WriterState::Fragment);
        Ok(true)
    }

    fn write_fragment(&mut self, kind: TrackKind) -> Result<()> {
        let sequence_number = self.compositor.next_sequence_number();
        let track = self
            .compositor
            .track_mut(kind)
            .ok_or(MuxError::UnknownTrack(kind))?;
        let samples = track.buffer.take_samples();
        let Some(first) = samples.first() else {
            return Err(MuxError::InvalidState(format!("empty {kind} fragment")).into());
        };
        let first_timestamp_us = first.timestamp_us;
        track.first_timestamp_us.get_or_insert(first_timestamp_us);
        let time = track.media_time(first_timestamp_us);
        let sample_count = samples.len();

        let unit = FragmentUnit::new(track, sequence_number, samples)?;
        let starts_with_sync = unit.starts_with_sync;
        let moof_offset = unit.write(&mut self.compositor)?;

        if starts_with_sync {
            if let Some(track) = self.compositor.track_mut(kind) {
                track
                    .random_access
                    .push(RandomAccessEntry { time, moof_offset });
            }
        }

        let fragment = self.compositor.take_output();
        tracing::debug!(
            track = %kind,
            sequence_number,
            samples = sample_count,
            bytes = fragment.len(),
            moof_offset,
            "Wrote fragment"
        );
        self.output.push(fragment);
        Ok(())
    }

    fn write_due_fragments(&mut self) -> Result<()> {
        let due: Vec<TrackKind> = self
            .compositor
            .tracks()
            .iter()
            .filter(|t| t.buffer.is_due())
            .map(|t| t.kind())
            .collect();
        for kind in due {
            self.write_fragment(kind)?;
        }

        let drained = self.compositor.tracks().iter().all(|t| t.buffer.is_empty());
        if self.all_tracks_ended() && drained {
            self.set_state(WriterState::FinalIndex);
        }
        Ok(())
    }

    fn write_index(&mut self) -> Result<()> {
        let index = RandomAccessIndex::new(self.compositor.tracks());
        let size = index.write(&mut self.compositor)?;
        self.output.push(self.compositor.take_output());
        tracing::info!(
            bytes = size,
            total_bytes = self.compositor.flushed(),
            "Wrote random access index"
        );
        self.set_state(WriterState::Done);
        Ok(())
    }
}

impl ContainerWriter for IsoMediaWriter {
    fn set_metadata(&mut self, metadata: TrackMetadata) -> Result<()> {
        if self.state != WriterState::Header {
            return Err(MuxError::InvalidState(format!(
                "metadata set in {} state",
                self.state
            ))
            .into());
        }
        let id = self
            .compositor
            .add_track(metadata, self.config.fragment_duration_secs)?;
        tracing::info!(track_id = id, kind = %metadata.kind(), "Track metadata set");
        Ok(())
    }

    fn write_encoded_track(&mut self, frames: Vec<EncodedFrame>, flags: WriteFlags) -> Result<()> {
        if matches!(self.state, WriterState::FinalIndex | WriterState::Done) {
            return Err(MuxError::InvalidState(format!(
                "frames written in {} state",
                self.state
            ))
            .into());
        }
        self.validate_batch(&frames, flags)?;

        for frame in frames {
            // validate_batch checked every frame has a configured track
            let kind = frame
                .frame_type
                .track_kind()
                .ok_or(MuxError::UnsupportedFrame(frame.frame_type))?;
            let track = self
                .compositor
                .track_mut(kind)
                .ok_or(MuxError::UnknownTrack(kind))?;
            track.buffer.add_frame(frame)?;
        }
        if let Some(kind) = flags.end_of_stream_track() {
            if let Some(track) = self.compositor.track_mut(kind) {
                tracing::debug!(track = %kind, "End of stream");
                track.buffer.set_end_of_stream();
            }
        }

        if self.state == WriterState::Header && !self.try_write_header()? {
            return Ok(());
        }
        self.write_due_fragments()
    }

    fn get_container_data(&mut self) -> Result<Vec<Bytes>> {
        match self.state {
            WriterState::Header if !self.compositor.tracks().is_empty() => {
                self.try_write_header()?;
            }
            WriterState::FinalIndex => self.write_index()?,
            _ => {}
        }
        let units = std::mem::take(&mut self.output);
        if self.state == WriterState::Done && !self.complete_reported {
            self.complete_reported = true;
            tracing::info!(
                total_bytes = self.compositor.flushed(),
                "Container writing complete"
            );
        }
        Ok(units)
    }

    fn is_writing_complete(&self) -> bool {
        self.state == WriterState::Done && self.output.is_empty()
    }

    fn mime_type(&self) -> &'static str {
        if self.compositor.has_video_track() {
            MIME_VIDEO_MP4
        } else {
            MIME_AUDIO_MP4
        }
    }
}
