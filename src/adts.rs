//! ADTS AAC elementary stream source.
//!
//! Reads a complete `.aac` file, strips the ADTS headers and serves the raw
//! access units as a [`TrackEncoder`]. The first pull carries the
//! AudioSpecificConfig derived from the first header.

use crate::encoder::{TrackEncoder, DEFAULT_BATCH_SIZE};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use recmux_mp4::descriptor::audio_specific_config;
use recmux_mp4::{AudioMetadata, EncodedFrame, Error, FrameType, Result, TrackMetadata};
use std::path::Path;

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// ADTS fixed + variable header length without CRC.
const HEADER_LEN: usize = 7;
const CRC_LEN: usize = 2;
const SAMPLES_PER_FRAME: u32 = 1024;

/// Fields of one ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (profile + 1).
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    pub protection_absent: bool,
    /// Whole frame length including the header.
    pub frame_length: usize,
    pub raw_data_blocks: u8,
}

impl AdtsHeader {
    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::config("truncated ADTS header"));
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(Error::config("missing ADTS sync word"));
        }
        if data[1] & 0x06 != 0 {
            return Err(Error::config("ADTS layer must be 0"));
        }

        let header = Self {
            object_type: (data[2] >> 6) + 1,
            sampling_frequency_index: (data[2] >> 2) & 0x0F,
            channel_configuration: ((data[2] & 0x01) << 2) | (data[3] >> 6),
            protection_absent: data[1] & 0x01 == 1,
            frame_length: (((data[3] & 0x03) as usize) << 11)
                | ((data[4] as usize) << 3)
                | ((data[5] >> 5) as usize),
            raw_data_blocks: data[6] & 0x03,
        };
        // Each ADTS frame must carry exactly one access unit
        if header.raw_data_blocks > 0 {
            return Err(Error::config(format!(
                "ADTS frames with {} raw data blocks are not supported",
                header.raw_data_blocks + 1
            )));
        }
        if header.frame_length < header.header_len() {
            return Err(Error::config(format!(
                "ADTS frame length {} shorter than its header",
                header.frame_length
            )));
        }
        Ok(header)
    }

    /// Header length, including the CRC when present.
    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            HEADER_LEN
        } else {
            HEADER_LEN + CRC_LEN
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLING_FREQUENCIES
            .get(self.sampling_frequency_index as usize)
            .copied()
    }

    /// Track metadata described by this header.
    pub fn metadata(&self) -> Result<AudioMetadata> {
        let sample_rate = self.sample_rate().ok_or_else(|| {
            Error::config(format!(
                "reserved ADTS sampling frequency index {}",
                self.sampling_frequency_index
            ))
        })?;
        let mut audio = AudioMetadata::aac_lc(sample_rate, u16::from(self.channel_configuration));
        audio.object_type = self.object_type;
        audio.frame_duration = SAMPLES_PER_FRAME;
        Ok(audio)
    }
}

/// Split an ADTS stream into raw access units.
pub fn split_frames(data: &Bytes) -> Result<(AdtsHeader, Vec<Bytes>)> {
    let first = AdtsHeader::parse(data)?;
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if data.len() - pos < HEADER_LEN {
            tracing::warn!(offset = pos, "Dropping truncated trailing ADTS header");
            break;
        }
        let header = AdtsHeader::parse(&data[pos..])?;
        if header.sampling_frequency_index != first.sampling_frequency_index
            || header.channel_configuration != first.channel_configuration
        {
            return Err(Error::config(format!(
                "ADTS parameters change at byte {pos}"
            )));
        }
        let end = pos + header.frame_length;
        if end > data.len() {
            tracing::warn!(offset = pos, "Dropping truncated trailing ADTS frame");
            break;
        }
        frames.push(data.slice(pos + header.header_len()..end));
        pos = end;
    }

    Ok((first, frames))
}

/// [`TrackEncoder`] serving the frames of an ADTS file.
#[derive(Debug)]
pub struct AdtsFileEncoder {
    metadata: AudioMetadata,
    config: Option<Bytes>,
    frames: std::vec::IntoIter<Bytes>,
    next_index: u64,
    batch: usize,
}

impl AdtsFileEncoder {
    /// Read and index an ADTS file.
    pub async fn open(path: impl AsRef<Path>, batch: usize) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read ADTS file: {:?}", path))?;
        let encoder = Self::from_bytes(Bytes::from(data), batch)
            .with_context(|| format!("Failed to parse ADTS file: {:?}", path))?;
        Ok(encoder)
    }

    pub fn from_bytes(data: Bytes, batch: usize) -> Result<Self> {
        let (header, frames) = split_frames(&data)?;
        let metadata = header.metadata()?;
        TrackMetadata::Audio(metadata).validate()?;
        let config = audio_specific_config(&metadata)?;
        tracing::debug!(
            frames = frames.len(),
            sample_rate = metadata.sample_rate,
            channels = metadata.channels,
            "Indexed ADTS stream"
        );

        Ok(Self {
            metadata,
            config: Some(config),
            frames: frames.into_iter(),
            next_index: 0,
            batch: if batch == 0 { DEFAULT_BATCH_SIZE } else { batch },
        })
    }

    pub fn audio_metadata(&self) -> &AudioMetadata {
        &self.metadata
    }

    /// Remaining frames not yet pulled.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    fn frame_duration_us(&self) -> u64 {
        u64::from(self.metadata.frame_duration) * 1_000_000 / u64::from(self.metadata.sample_rate)
    }

    fn timestamp_us(&self, index: u64) -> u64 {
        index * u64::from(self.metadata.frame_duration) * 1_000_000
            / u64::from(self.metadata.sample_rate)
    }
}

#[async_trait]
impl TrackEncoder for AdtsFileEncoder {
    async fn metadata(&mut self) -> Result<TrackMetadata> {
        Ok(TrackMetadata::Audio(self.metadata))
    }

    async fn encoded_track(&mut self) -> Result<Vec<EncodedFrame>> {
        let mut batch = Vec::with_capacity(self.batch + 1);
        if let Some(config) = self.config.take() {
            batch.push(EncodedFrame::new(config, FrameType::AudioConfig, 0));
        }
        let duration_us = self.frame_duration_us();
        while batch.len() < self.batch {
            let Some(data) = self.frames.next() else {
                break;
            };
            let timestamp_us = self.timestamp_us(self.next_index);
            batch.push(
                EncodedFrame::new(data, FrameType::AudioSample, timestamp_us)
                    .with_duration(duration_us),
            );
            self.next_index += 1;
        }
        Ok(batch)
    }

    fn is_complete(&self) -> bool {
        self.config.is_none() && self.frames.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ADTS frame with a 48 kHz stereo AAC-LC header and `payload`.
    fn adts_frame(payload: &[u8]) -> Vec<u8> {
        let len = HEADER_LEN + payload.len();
        let mut frame = vec![
            0xFF,
            0xF1,
            (1 << 6) | (3 << 2),
            (2 << 6) | ((len >> 11) as u8 & 0x03),
            (len >> 3) as u8,
            ((len as u8 & 0x07) << 5) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_parse_header() {
        let frame = adts_frame(&[1, 2, 3]);
        let header = AdtsHeader::parse(&frame).unwrap();
        assert_eq!(header.object_type, 2);
        assert_eq!(header.sample_rate(), Some(48000));
        assert_eq!(header.channel_configuration, 2);
        assert_eq!(header.frame_length, 10);
        assert!(header.protection_absent);
        assert_eq!(header.header_len(), 7);
    }

    #[test]
    fn test_crc_header_stripped() {
        let mut frame = adts_frame(&[0xAA, 0xBB, 0xCC, 0xDD]);
        frame[1] = 0xF0;
        let (header, frames) = split_frames(&Bytes::from(frame)).unwrap();
        assert_eq!(header.header_len(), 9);
        assert_eq!(frames[0].as_ref(), &[0xCC, 0xDD]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(AdtsHeader::parse(&[0x00; 7]).is_err());
        assert!(AdtsHeader::parse(&[0xFF, 0xF1]).is_err());
    }

    #[test]
    fn test_rejects_multiple_raw_data_blocks() {
        let mut frame = adts_frame(&[1, 2, 3]);
        frame[6] |= 0x01;
        assert!(matches!(AdtsHeader::parse(&frame), Err(Error::Config(_))));
        assert!(AdtsFileEncoder::from_bytes(Bytes::from(frame), 4).is_err());
    }

    #[test]
    fn test_truncated_tail_dropped() {
        let mut data = adts_frame(&[1; 4]);
        data.extend(adts_frame(&[2; 4]));
        let mut short_header = data.clone();
        short_header.extend_from_slice(&[0xFF, 0xF1, 0x4C]);
        let (_, frames) = split_frames(&Bytes::from(short_header)).unwrap();
        assert_eq!(frames.len(), 2);

        let mut short_frame = data;
        short_frame.extend(&adts_frame(&[3; 4])[..9]);
        let (_, frames) = split_frames(&Bytes::from(short_frame)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_ref(), &[2; 4]);

        assert!(split_frames(&Bytes::from_static(&[0xFF, 0xF1, 0x4C])).is_err());
    }

    #[tokio::test]
    async fn test_serves_config_then_samples() {
        let mut data = Vec::new();
        for i in 0..5u8 {
            data.extend(adts_frame(&[i; 6]));
        }
        let mut encoder = AdtsFileEncoder::from_bytes(Bytes::from(data), 4).unwrap();
        assert!(matches!(
            encoder.metadata().await.unwrap(),
            TrackMetadata::Audio(a) if a.sample_rate == 48000 && a.channels == 2
        ));

        let first = encoder.encoded_track().await.unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].frame_type, FrameType::AudioConfig);
        assert_eq!(first[0].data.as_ref(), &[0x11, 0x90]);
        assert_eq!(first[1].data.as_ref(), &[0; 6]);
        assert!(!encoder.is_complete());

        let second = encoder.encoded_track().await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].timestamp_us, 4 * 1024 * 1_000_000 / 48000);
        assert!(encoder.is_complete());
    }
}
