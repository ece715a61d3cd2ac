//! Compressed frames handed over by track encoders.

use crate::metadata::TrackKind;
use bytes::Bytes;

/// Type tag of an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    AudioSample,
    /// AAC AudioSpecificConfig (codec specific data).
    AudioConfig,
    VideoIFrame,
    VideoPFrame,
    VideoBFrame,
    /// AVC parameter sets (codec specific data).
    VideoConfig,
    Unknown,
}

impl FrameType {
    /// Track the frame belongs to, `None` for [`FrameType::Unknown`].
    pub fn track_kind(&self) -> Option<TrackKind> {
        match self {
            Self::AudioSample | Self::AudioConfig => Some(TrackKind::Audio),
            Self::VideoIFrame | Self::VideoPFrame | Self::VideoBFrame | Self::VideoConfig => {
                Some(TrackKind::Video)
            }
            Self::Unknown => None,
        }
    }

    /// Whether the frame carries codec configuration instead of a sample.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::AudioConfig | Self::VideoConfig)
    }

    /// Whether a decoder can start at this sample.
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::AudioSample | Self::VideoIFrame)
    }
}

/// One compressed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub frame_type: FrameType,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: u64,
    /// Frame duration in microseconds, when the encoder knows it.
    pub duration_us: Option<u64>,
}

impl EncodedFrame {
    pub fn new(data: impl Into<Bytes>, frame_type: FrameType, timestamp_us: u64) -> Self {
        Self {
            data: data.into(),
            frame_type,
            timestamp_us,
            duration_us: None,
        }
    }

    pub fn with_duration(mut self, duration_us: u64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_kind() {
        assert_eq!(FrameType::AudioConfig.track_kind(), Some(TrackKind::Audio));
        assert_eq!(FrameType::VideoBFrame.track_kind(), Some(TrackKind::Video));
        assert_eq!(FrameType::Unknown.track_kind(), None);
        assert!(FrameType::VideoConfig.is_config());
        assert!(!FrameType::VideoPFrame.is_sync());
    }
}
