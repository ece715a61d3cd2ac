//! Per-track buffering of samples until a fragment is due.

use crate::avc;
use crate::error::{MuxError, Result};
use crate::frame::EncodedFrame;
use crate::metadata::{TrackKind, TrackMetadata};
use bytes::Bytes;

/// Pending samples of one track, in presentation order.
#[derive(Debug)]
pub struct FragmentBuffer {
    kind: TrackKind,
    samples: Vec<EncodedFrame>,
    codec_config: Option<Bytes>,
    end_of_stream: bool,
    samples_per_fragment: u32,
}

impl FragmentBuffer {
    /// Create a buffer that targets `fragment_secs` seconds per fragment.
    pub fn new(metadata: &TrackMetadata, fragment_secs: u32) -> Result<Self> {
        Ok(Self {
            kind: metadata.kind(),
            samples: Vec::new(),
            codec_config: None,
            end_of_stream: false,
            samples_per_fragment: metadata.samples_per_fragment(fragment_secs)?,
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Queue a frame. Config frames replace the retained codec configuration
    /// and are never queued as samples.
    pub fn add_frame(&mut self, frame: EncodedFrame) -> Result<()> {
        if frame.frame_type.track_kind() != Some(self.kind) {
            return Err(MuxError::UnsupportedFrame(frame.frame_type).into());
        }

        if frame.frame_type.is_config() {
            let config = match self.kind {
                TrackKind::Video => match avc::split_length_prefixed(&frame.data) {
                    Some(nals) => avc::record_from_nals(&nals)?,
                    None if avc::is_annexb(&frame.data) => {
                        avc::decoder_configuration_record(&frame.data)?
                    }
                    // Already an AVCDecoderConfigurationRecord
                    None => frame.data,
                },
                TrackKind::Audio => frame.data,
            };
            self.codec_config = Some(config);
            return Ok(());
        }

        let frame = match self.kind {
            TrackKind::Video if avc::is_annexb(&frame.data) => EncodedFrame {
                data: avc::to_length_prefixed(&frame.data),
                ..frame
            },
            _ => frame,
        };
        self.samples.push(frame);
        Ok(())
    }

    /// Whether a full fragment worth of samples is buffered.
    pub fn has_enough_data(&self) -> bool {
        self.samples.len() >= self.samples_per_fragment as usize
    }

    pub fn samples_per_fragment(&self) -> u32 {
        self.samples_per_fragment
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[EncodedFrame] {
        &self.samples
    }

    /// Total payload bytes of the pending samples.
    pub fn pending_bytes(&self) -> usize {
        self.samples.iter().map(EncodedFrame::len).sum()
    }

    pub fn codec_config(&self) -> Option<&Bytes> {
        self.codec_config.as_ref()
    }

    pub fn set_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Whether a fragment should be emitted now.
    pub fn is_due(&self) -> bool {
        self.has_enough_data() || (self.end_of_stream && !self.samples.is_empty())
    }

    /// Remove and return the pending samples; the codec config is retained.
    pub fn take_samples(&mut self) -> Vec<EncodedFrame> {
        std::mem::take(&mut self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;
    use crate::metadata::{AudioMetadata, VideoMetadata};
    use crate::Error;

    fn audio_buffer() -> FragmentBuffer {
        let meta = TrackMetadata::Audio(AudioMetadata::aac_lc(48000, 2));
        FragmentBuffer::new(&meta, 10).unwrap()
    }

    fn sample(i: u64) -> EncodedFrame {
        EncodedFrame::new(vec![0u8; 8], FrameType::AudioSample, i * 21_333)
    }

    #[test]
    fn test_threshold_boundary() {
        let mut buf = audio_buffer();
        assert_eq!(buf.samples_per_fragment(), 469);
        for i in 0..468 {
            buf.add_frame(sample(i)).unwrap();
        }
        assert!(!buf.has_enough_data());
        assert!(!buf.is_due());
        buf.add_frame(sample(468)).unwrap();
        assert!(buf.has_enough_data());
        assert!(buf.is_due());
    }

    #[test]
    fn test_config_frame_is_retained_not_queued() {
        let mut buf = audio_buffer();
        buf.add_frame(EncodedFrame::new(vec![0x11, 0x90], FrameType::AudioConfig, 0))
            .unwrap();
        buf.add_frame(sample(0)).unwrap();
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.pending_bytes(), 8);

        let taken = buf.take_samples();
        assert_eq!(taken.len(), 1);
        assert!(buf.is_empty());
        assert_eq!(buf.codec_config().unwrap().as_ref(), &[0x11, 0x90]);
    }

    #[test]
    fn test_end_of_stream_forces_flush_only_with_samples() {
        let mut buf = audio_buffer();
        buf.set_end_of_stream();
        assert!(!buf.is_due());
        buf.add_frame(sample(0)).unwrap();
        assert!(buf.is_due());
        assert!(buf.is_end_of_stream());
    }

    #[test]
    fn test_wrong_track_frame_rejected() {
        let mut buf = audio_buffer();
        let err = buf
            .add_frame(EncodedFrame::new(vec![1], FrameType::VideoIFrame, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Mux(MuxError::UnsupportedFrame(FrameType::VideoIFrame))
        ));
    }

    #[test]
    fn test_video_annexb_samples_are_length_prefixed() {
        let meta = TrackMetadata::Video(VideoMetadata {
            width: 320,
            height: 240,
            clock_rate: 90000,
            frame_rate: 25,
        });
        let mut buf = FragmentBuffer::new(&meta, 2).unwrap();
        assert_eq!(buf.samples_per_fragment(), 50);
        buf.add_frame(EncodedFrame::new(
            vec![0, 0, 0, 1, 0x65, 0xAA, 0xBB],
            FrameType::VideoIFrame,
            0,
        ))
        .unwrap();
        assert_eq!(
            buf.samples()[0].data.as_ref(),
            &[0, 0, 0, 3, 0x65, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_length_prefixed_samples_pass_through() {
        let meta = TrackMetadata::Video(VideoMetadata {
            width: 320,
            height: 240,
            clock_rate: 90000,
            frame_rate: 25,
        });
        let mut buf = FragmentBuffer::new(&meta, 2).unwrap();

        // 300-byte NAL: its length prefix begins with 00 00 01
        let mut sample = vec![0, 0, 1, 0x2C, 0x65];
        sample.extend(std::iter::repeat(0xAB).take(299));
        buf.add_frame(EncodedFrame::new(sample.clone(), FrameType::VideoIFrame, 0))
            .unwrap();
        assert_eq!(buf.samples()[0].data.as_ref(), sample.as_slice());

        let sps = [0x67, 0x42, 0xC0, 0x1E];
        let pps = [0x68, 0xCE, 0x3C];
        let mut config = vec![0, 0, 0, 4];
        config.extend_from_slice(&sps);
        config.extend_from_slice(&[0, 0, 0, 3]);
        config.extend_from_slice(&pps);
        buf.add_frame(EncodedFrame::new(config, FrameType::VideoConfig, 0))
            .unwrap();
        let mut expected = vec![1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0, 4];
        expected.extend_from_slice(&sps);
        expected.extend_from_slice(&[1, 0, 3]);
        expected.extend_from_slice(&pps);
        assert_eq!(buf.codec_config().unwrap().as_ref(), expected.as_slice());
    }
}
