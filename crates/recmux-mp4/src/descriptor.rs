//! MPEG-4 elementary stream descriptors (ISO/IEC 14496-1 7.2.6) carried in
//! the `esds` box of an AAC sample entry.
//!
//! Descriptors follow the same generate/write protocol as boxes, with a one
//! byte tag and an expandable length instead of a box header.

use crate::boxes::MuxNode;
use crate::compositor::Compositor;
use crate::error::{MuxError, Result};
use crate::fourcc::FourCc;
use crate::metadata::AudioMetadata;
use bytes::Bytes;

pub const ES_DESCR_TAG: u8 = 0x03;
pub const DECODER_CONFIG_DESCR_TAG: u8 = 0x04;
pub const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
pub const SL_CONFIG_DESCR_TAG: u8 = 0x06;

/// objectTypeIndication for MPEG-4 Audio (14496-1 table 5).
pub const OBJECT_TYPE_MPEG4_AUDIO: u8 = 0x40;
/// streamType for audio streams (14496-1 table 6).
pub const STREAM_TYPE_AUDIO: u8 = 0x05;

/// Decoder input buffer of one mono AAC channel, in bits (14496-3 4.5.3.1).
const AAC_MIN_BUFFER_BITS: u32 = 6144;

/// Largest length an expandable size field can hold (4 bytes of 7 bits).
const MAX_DESCRIPTOR_LEN: u64 = (1 << 28) - 1;

/// Bytes used by the expandable encoding of `len`.
fn expandable_len_size(len: u64) -> Result<u64> {
    match len {
        0..=0x7F => Ok(1),
        0x80..=0x3FFF => Ok(2),
        0x4000..=0x1F_FFFF => Ok(3),
        0x20_0000..=MAX_DESCRIPTOR_LEN => Ok(4),
        _ => Err(MuxError::OffsetOverflow {
            field: "descriptor length",
            value: len,
        }
        .into()),
    }
}

/// Write a descriptor tag and its expandable length, 7 bits per byte with a
/// continuation bit.
fn write_descriptor_header(out: &mut Compositor, tag: u8, len: u64) -> Result<()> {
    out.put_u8(tag)?;
    let bytes = expandable_len_size(len)?;
    for i in (0..bytes).rev() {
        out.write_bits(u64::from(i > 0), 1)?;
        out.write_bits((len >> (7 * i)) & 0x7F, 7)?;
    }
    Ok(())
}

/// Payload length of a generated descriptor.
fn payload_len(len: Option<u64>, tag: u8) -> Result<u64> {
    len.ok_or_else(|| MuxError::NotGenerated(FourCc([tag, 0, 0, 0])).into())
}

/// Write a descriptor whose payload is `len` bytes, checking the byte count.
fn write_descriptor<F>(out: &mut Compositor, tag: u8, len: u64, payload: F) -> Result<()>
where
    F: FnOnce(&mut Compositor) -> Result<()>,
{
    let total = 1 + expandable_len_size(len)? + len;
    out.write_checked(FourCc([tag, 0, 0, 0]), total, |out| {
        write_descriptor_header(out, tag, len)?;
        payload(out)
    })
}

/// Build an AAC AudioSpecificConfig (14496-3 1.6.2.1) from track metadata.
///
/// Used when no config frame arrived before the header is written.
pub fn audio_specific_config(audio: &AudioMetadata) -> Result<Bytes> {
    let frequency_index = audio.sampling_frequency_index().ok_or_else(|| {
        crate::Error::metadata(format!(
            "sample rate {} has no AudioSpecificConfig index",
            audio.sample_rate
        ))
    })?;
    let channels = audio.channel_configuration().ok_or_else(|| {
        crate::Error::metadata(format!("unsupported channel count {}", audio.channels))
    })?;

    let mut asc = Compositor::new();
    asc.write_bits(u64::from(audio.object_type & 0x1F), 5)?;
    asc.write_bits(u64::from(frequency_index), 4)?;
    asc.write_bits(u64::from(channels), 4)?;
    // GASpecificConfig: frameLengthFlag, dependsOnCoreCoder, extensionFlag
    asc.write_bits(u64::from(audio.frame_duration == 960), 1)?;
    asc.write_bits(0, 2)?;
    Ok(asc.take_output())
}

/// Codec specific bytes, embedded in a DecoderSpecificInfo descriptor.
#[derive(Debug, Clone)]
pub struct DecoderSpecificInfo {
    data: Bytes,
    size: Option<u64>,
}

impl DecoderSpecificInfo {
    pub fn new(data: Bytes) -> Self {
        Self { data, size: None }
    }

    /// Whether `data` already carries its own DecoderSpecificInfo header.
    pub fn is_wrapped(&self) -> bool {
        let Some((&tag, rest)) = self.data.split_first() else {
            return false;
        };
        if tag != DECODER_SPECIFIC_INFO_TAG {
            return false;
        }
        let mut len = 0usize;
        for (i, &b) in rest.iter().take(4).enumerate() {
            len = (len << 7) | (b & 0x7F) as usize;
            if b & 0x80 == 0 {
                return rest.len() - (i + 1) == len;
            }
        }
        false
    }
}

impl MuxNode for DecoderSpecificInfo {
    fn generate(&mut self) -> Result<u64> {
        let len = self.data.len() as u64;
        let size = if self.is_wrapped() {
            len
        } else {
            1 + expandable_len_size(len)? + len
        };
        self.size = Some(size);
        Ok(size)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let size = payload_len(self.size, DECODER_SPECIFIC_INFO_TAG)?;
        if self.is_wrapped() {
            return out.write_checked(FourCc([DECODER_SPECIFIC_INFO_TAG, 0, 0, 0]), size, |out| {
                out.put_slice(&self.data)
            });
        }
        write_descriptor(
            out,
            DECODER_SPECIFIC_INFO_TAG,
            self.data.len() as u64,
            |out| out.put_slice(&self.data),
        )
    }
}

/// DecoderConfigDescriptor (14496-1 7.2.6.6).
#[derive(Debug, Clone)]
pub struct DecoderConfigDescriptor {
    pub object_type_indication: u8,
    pub stream_type: u8,
    pub up_stream: bool,
    /// Decoder buffer size in bytes, 24 bits.
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub specific_info: DecoderSpecificInfo,
    len: Option<u64>,
}

impl DecoderConfigDescriptor {
    /// Descriptor for an AAC stream with the given codec config.
    pub fn aac(audio: &AudioMetadata, config: Bytes) -> Self {
        Self {
            object_type_indication: OBJECT_TYPE_MPEG4_AUDIO,
            stream_type: STREAM_TYPE_AUDIO,
            up_stream: false,
            buffer_size_db: AAC_MIN_BUFFER_BITS / 8 * u32::from(audio.channels),
            max_bitrate: audio.max_bitrate,
            avg_bitrate: audio.avg_bitrate,
            specific_info: DecoderSpecificInfo::new(config),
            len: None,
        }
    }
}

impl MuxNode for DecoderConfigDescriptor {
    fn generate(&mut self) -> Result<u64> {
        let len = 13 + self.specific_info.generate()?;
        self.len = Some(len);
        Ok(1 + expandable_len_size(len)? + len)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let len = payload_len(self.len, DECODER_CONFIG_DESCR_TAG)?;
        if self.buffer_size_db > 0x00FF_FFFF {
            return Err(MuxError::OffsetOverflow {
                field: "bufferSizeDB",
                value: self.buffer_size_db as u64,
            }
            .into());
        }
        write_descriptor(out, DECODER_CONFIG_DESCR_TAG, len, |out| {
            out.put_u8(self.object_type_indication)?;
            out.write_bits(u64::from(self.stream_type & 0x3F), 6)?;
            out.write_bits(u64::from(self.up_stream), 1)?;
            out.write_bits(1, 1)?; // reserved
            out.write_bits(u64::from(self.buffer_size_db), 24)?;
            out.put_u32(self.max_bitrate)?;
            out.put_u32(self.avg_bitrate)?;
            self.specific_info.write(out)
        })
    }
}

/// SLConfigDescriptor with the predefined MP4 configuration (14496-1 7.3.2.3).
#[derive(Debug, Clone, Default)]
pub struct SlConfigDescriptor;

/// predefined = 0x02: reserved for use in MP4 files.
const SL_PREDEFINED_MP4: u8 = 0x02;

impl MuxNode for SlConfigDescriptor {
    fn generate(&mut self) -> Result<u64> {
        Ok(3)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        write_descriptor(out, SL_CONFIG_DESCR_TAG, 1, |out| {
            out.put_u8(SL_PREDEFINED_MP4)
        })
    }
}

/// ES_Descriptor (14496-1 7.2.6.5), the root of the descriptor tree.
#[derive(Debug, Clone)]
pub struct EsDescriptor {
    /// Zero inside MP4 files (14496-14 3.1.2).
    pub es_id: u16,
    pub stream_priority: u8,
    pub decoder_config: DecoderConfigDescriptor,
    pub sl_config: SlConfigDescriptor,
    len: Option<u64>,
}

impl EsDescriptor {
    pub fn new(decoder_config: DecoderConfigDescriptor) -> Self {
        Self {
            es_id: 0,
            stream_priority: 0,
            decoder_config,
            sl_config: SlConfigDescriptor,
            len: None,
        }
    }

    /// Descriptor tree for an AAC track.
    pub fn aac(audio: &AudioMetadata, config: Bytes) -> Self {
        Self::new(DecoderConfigDescriptor::aac(audio, config))
    }
}

impl MuxNode for EsDescriptor {
    fn generate(&mut self) -> Result<u64> {
        let len = 3 + self.decoder_config.generate()? + self.sl_config.generate()?;
        self.len = Some(len);
        Ok(1 + expandable_len_size(len)? + len)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let len = payload_len(self.len, ES_DESCR_TAG)?;
        write_descriptor(out, ES_DESCR_TAG, len, |out| {
            out.put_u16(self.es_id)?;
            out.write_bits(0, 1)?; // streamDependenceFlag
            out.write_bits(0, 1)?; // URL_Flag
            out.write_bits(0, 1)?; // OCRstreamFlag
            out.write_bits(u64::from(self.stream_priority & 0x1F), 5)?;
            self.decoder_config.write(out)?;
            self.sl_config.write(out)
        })
    }
}
