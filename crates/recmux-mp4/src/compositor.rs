//! Output compositing: byte buffer, bit packer, offsets and track registry.
//!
//! Boxes serialize through the [`Compositor`]. It keeps the bytes of the
//! unit being produced until [`Compositor::take_output`] hands them out, and
//! remembers how many bytes left in earlier units so absolute file offsets
//! stay correct across flushes.

use crate::boxes::index::RandomAccessEntry;
use crate::error::{Error, MuxError, Result};
use crate::fourcc::FourCc;
use crate::fragment::FragmentBuffer;
use crate::metadata::{TrackKind, TrackMetadata};
use bitstream_io::{BigEndian, BitWrite, BitWriter};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Initial capacity of the output buffer.
const MUXING_BUFFER_SIZE: usize = 512 * 1024;

/// Seconds between 1904-01-01 (ISO time base) and 1970-01-01.
const ISO_EPOCH_OFFSET: u64 = (66 * 365 + 17) * 24 * 60 * 60;

/// A configured track and its pending samples.
#[derive(Debug)]
pub struct Track {
    /// Track ID, 1-based in registration order.
    pub id: u32,
    pub metadata: TrackMetadata,
    pub buffer: FragmentBuffer,
    /// One entry per emitted fragment that starts with a sync sample.
    pub(crate) random_access: Vec<RandomAccessEntry>,
    /// Timestamp of the first sample ever emitted, the track's time zero.
    pub(crate) first_timestamp_us: Option<u64>,
}

impl Track {
    pub fn kind(&self) -> TrackKind {
        self.metadata.kind()
    }

    /// Convert a presentation timestamp to track timescale ticks.
    pub(crate) fn media_time(&self, timestamp_us: u64) -> u64 {
        let base = self.first_timestamp_us.unwrap_or(timestamp_us);
        let elapsed = timestamp_us.saturating_sub(base) as u128;
        (elapsed * self.metadata.timescale() as u128 / 1_000_000) as u64
    }
}

/// Output buffer plus the state shared by every box of a muxing session.
pub struct Compositor {
    buf: BytesMut,
    /// Bytes handed out by previous `take_output` calls.
    flushed: u64,
    bits: Option<BitWriter<Vec<u8>, BigEndian>>,
    pending_bits: u32,
    tracks: Vec<Track>,
    sequence_number: u32,
    creation_time: u32,
}

impl Compositor {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let creation_time = u32::try_from(now + ISO_EPOCH_OFFSET).unwrap_or_else(|_| {
            tracing::warn!("Creation time does not fit a version 0 header, writing 0");
            0
        });

        Self {
            buf: BytesMut::with_capacity(MUXING_BUFFER_SIZE),
            flushed: 0,
            bits: None,
            pending_bits: 0,
            tracks: Vec::new(),
            sequence_number: 0,
            creation_time,
        }
    }

    // ---------------------------------------------------------------------
    // Track registry
    // ---------------------------------------------------------------------

    /// Register a track; returns its ID.
    pub fn add_track(&mut self, metadata: TrackMetadata, fragment_secs: u32) -> Result<u32> {
        metadata.validate()?;
        let kind = metadata.kind();
        if self.track(kind).is_some() {
            return Err(Error::config(format!("{kind} track already configured")));
        }

        let id = self.next_track_id();
        let buffer = FragmentBuffer::new(&metadata, fragment_secs)?;
        tracing::debug!(
            track_id = id,
            %kind,
            samples_per_fragment = buffer.samples_per_fragment(),
            "Registered track"
        );
        self.tracks.push(Track {
            id,
            metadata,
            buffer,
            random_access: Vec::new(),
            first_timestamp_us: None,
        });
        Ok(id)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn track_mut(&mut self, kind: TrackKind) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.kind() == kind)
    }

    pub fn has_audio_track(&self) -> bool {
        self.track(TrackKind::Audio).is_some()
    }

    pub fn has_video_track(&self) -> bool {
        self.track(TrackKind::Video).is_some()
    }

    pub fn next_track_id(&self) -> u32 {
        self.tracks.len() as u32 + 1
    }

    /// Advance and return the movie fragment sequence number (starts at 1).
    pub fn next_sequence_number(&mut self) -> u32 {
        self.sequence_number += 1;
        self.sequence_number
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Session creation time in seconds since 1904.
    pub fn creation_time(&self) -> u32 {
        self.creation_time
    }

    // ---------------------------------------------------------------------
    // Offsets and draining
    // ---------------------------------------------------------------------

    /// Absolute file offset of the next byte written.
    pub fn position(&self) -> u64 {
        self.flushed + self.buf.len() as u64
    }

    /// Bytes handed out by earlier `take_output` calls.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// Bytes accumulated since the last `take_output`.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Return and clear everything accumulated since the previous call.
    pub fn take_output(&mut self) -> Bytes {
        let out = self.buf.split().freeze();
        self.flushed += out.len() as u64;
        self.buf.reserve(MUXING_BUFFER_SIZE);
        out
    }

    // ---------------------------------------------------------------------
    // Byte writing
    // ---------------------------------------------------------------------

    fn ensure_aligned(&self) -> Result<()> {
        if self.pending_bits != 0 {
            return Err(MuxError::Unaligned {
                bits: self.pending_bits,
            }
            .into());
        }
        Ok(())
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.pending_bits == 0
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_u16(v);
        Ok(())
    }

    pub fn put_i16(&mut self, v: i16) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_i16(v);
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_u32(v);
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_u64(v);
        Ok(())
    }

    pub fn put_slice(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn put_zeros(&mut self, count: usize) -> Result<()> {
        self.ensure_aligned()?;
        self.buf.put_bytes(0, count);
        Ok(())
    }

    pub fn put_fourcc(&mut self, code: FourCc) -> Result<()> {
        self.put_slice(&code.0)
    }

    // ---------------------------------------------------------------------
    // Bit writing
    // ---------------------------------------------------------------------

    /// Append the low `bits` bits of `value`, most significant bit first.
    ///
    /// Completed bytes land in the output as soon as the accumulator is
    /// byte aligned again.
    pub fn write_bits(&mut self, value: u64, bits: u32) -> Result<()> {
        if bits == 0 {
            return Ok(());
        }
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(MuxError::OffsetOverflow {
                field: "bit field",
                value,
            }
            .into());
        }

        let writer = self
            .bits
            .get_or_insert_with(|| BitWriter::endian(Vec::new(), BigEndian));
        writer
            .write(bits, value)
            .map_err(|_| MuxError::OffsetOverflow {
                field: "bit field",
                value,
            })?;
        self.pending_bits = (self.pending_bits + bits) % 8;

        if self.pending_bits == 0 {
            if let Some(done) = self.bits.take() {
                self.buf.put_slice(&done.into_writer());
            }
        }
        Ok(())
    }

    /// Run `write` and check it emitted exactly `expected` bytes and left the
    /// bit accumulator aligned.
    pub fn write_checked<F>(&mut self, tag: FourCc, expected: u64, write: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let start = self.buf.len();
        write(self)?;
        self.ensure_aligned()?;
        let written = (self.buf.len() - start) as u64;
        if written != expected {
            tracing::error!(%tag, expected, written, "Box size mismatch");
            return Err(MuxError::SizeMismatch {
                tag,
                expected,
                written,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}
