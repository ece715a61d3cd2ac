//! Track metadata reported by encoders once they are ready.

use crate::error::{Error, Result};
use std::fmt;

/// AAC Main audio object type (ISO/IEC 14496-3 table 1.15).
pub const AAC_MAIN: u8 = 0x01;
/// AAC LC audio object type.
pub const AAC_LC: u8 = 0x02;

/// Sampling frequencies indexed by `samplingFrequencyIndex` (14496-3 table 1.16).
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Track type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// AAC track parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMetadata {
    /// Audio object type, [`AAC_MAIN`] or [`AAC_LC`].
    pub object_type: u8,
    /// Samples per second, 7350 to 96000.
    pub sample_rate: u32,
    /// Samples per compressed frame (1024 for AAC).
    pub frame_duration: u32,
    /// Fixed compressed frame size in bytes, 0 when variable.
    pub frame_size: u32,
    /// Channel count.
    pub channels: u16,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
}

impl AudioMetadata {
    /// AAC-LC defaults for the given rate and channel count.
    pub fn aac_lc(sample_rate: u32, channels: u16) -> Self {
        Self {
            object_type: AAC_LC,
            sample_rate,
            frame_duration: 1024,
            frame_size: 0,
            channels,
            max_bitrate: 0,
            avg_bitrate: 0,
        }
    }

    /// Index into the 14496-3 sampling frequency table, if the rate is listed.
    pub fn sampling_frequency_index(&self) -> Option<u8> {
        SAMPLING_FREQUENCIES
            .iter()
            .position(|&f| f == self.sample_rate)
            .map(|i| i as u8)
    }

    /// Channel configuration value for the AudioSpecificConfig.
    pub fn channel_configuration(&self) -> Option<u8> {
        match self.channels {
            1..=6 => Some(self.channels as u8),
            8 => Some(7),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(7350..=96000).contains(&self.sample_rate) {
            return Err(Error::config(format!(
                "audio sample rate {} outside 7350..=96000",
                self.sample_rate
            )));
        }
        if self.frame_duration == 0 {
            return Err(Error::config("audio frame duration cannot be 0"));
        }
        if self.channel_configuration().is_none() {
            return Err(Error::config(format!(
                "unsupported audio channel count {}",
                self.channels
            )));
        }
        Ok(())
    }
}

/// AVC track parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Media clock in Hz, 90000 for AVC.
    pub clock_rate: u32,
    /// Frames per second.
    pub frame_rate: u32,
}

impl VideoMetadata {
    fn validate(&self) -> Result<()> {
        let max = u16::MAX as u32;
        if self.width == 0 || self.height == 0 || self.width > max || self.height > max {
            return Err(Error::config(format!(
                "invalid video dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.clock_rate == 0 {
            return Err(Error::config("video clock rate cannot be 0"));
        }
        if self.frame_rate == 0 {
            return Err(Error::config("video frame rate cannot be 0"));
        }
        Ok(())
    }
}

/// Metadata of one elementary stream. Immutable once reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMetadata {
    Audio(AudioMetadata),
    Video(VideoMetadata),
}

impl TrackMetadata {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Audio(_) => TrackKind::Audio,
            Self::Video(_) => TrackKind::Video,
        }
    }

    /// Check parameters; invalid values are a configuration error.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Audio(audio) => audio.validate(),
            Self::Video(video) => video.validate(),
        }
    }

    /// Media timescale (ticks per second).
    pub fn timescale(&self) -> u32 {
        match self {
            Self::Audio(audio) => audio.sample_rate,
            Self::Video(video) => video.clock_rate,
        }
    }

    /// Duration of one sample in timescale ticks.
    pub fn default_sample_duration(&self) -> u32 {
        match self {
            Self::Audio(audio) => audio.frame_duration,
            Self::Video(video) => video.clock_rate / video.frame_rate.max(1),
        }
    }

    /// Number of samples that make up one fragment of `fragment_secs` seconds.
    ///
    /// Audio rounds up: 10 s of 48 kHz audio in 1024-sample frames is 469
    /// samples.
    pub fn samples_per_fragment(&self, fragment_secs: u32) -> Result<u32> {
        if fragment_secs == 0 {
            return Err(Error::config("fragment duration cannot be 0"));
        }
        let target = match self {
            Self::Audio(audio) => {
                if audio.sample_rate == 0 || audio.frame_duration == 0 {
                    return Err(Error::config("audio rate and frame duration must be non-zero"));
                }
                (fragment_secs as u64 * audio.sample_rate as u64)
                    .div_ceil(audio.frame_duration as u64)
            }
            Self::Video(video) => {
                if video.frame_rate == 0 {
                    return Err(Error::config("video frame rate must be non-zero"));
                }
                fragment_secs as u64 * video.frame_rate as u64
            }
        };
        u32::try_from(target)
            .map_err(|_| Error::config(format!("fragment of {target} samples is too large")))
    }
}
