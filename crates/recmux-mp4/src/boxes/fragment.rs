//! Movie fragment boxes: `moof` with its `mfhd`/`traf` children, and the
//! `mdat` carrying the fragment's samples (ISO/IEC 14496-12 8.8.4 - 8.8.8).

use super::{leaf_box, BoxHeader, ContainerBox, MuxNode, Slot};
use crate::boxes::movie::{SAMPLE_FLAGS_NON_SYNC, SAMPLE_FLAGS_SYNC};
use crate::compositor::{Compositor, Track};
use crate::error::{MuxError, Result};
use crate::fourcc::FourCc;
use crate::frame::EncodedFrame;
use crate::metadata::TrackKind;
use bytes::Bytes;

/// `tfhd` flag: base-data-offset-present.
pub const TF_BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;
/// `tfhd` flag: default-sample-duration-present.
pub const TF_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;
/// `trun` flag: sample-size-present.
pub const TR_SAMPLE_SIZE_PRESENT: u32 = 0x000200;
/// `trun` flag: sample-flags-present.
pub const TR_SAMPLE_FLAGS_PRESENT: u32 = 0x000400;

/// Size of the `mdat` header preceding the sample bytes.
pub const MDAT_HEADER_LEN: u64 = 8;

/// Movie fragment header box.
pub struct MfhdBox {
    header: BoxHeader,
    pub sequence_number: u32,
}

impl MfhdBox {
    pub fn new(sequence_number: u32) -> Self {
        Self {
            header: BoxHeader::full(FourCc::MFHD, 0, 0),
            sequence_number,
        }
    }
}

impl MuxNode for MfhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(4)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header
            .write_with(out, |out| out.put_u32(self.sequence_number))
    }
}

/// Track fragment header box. The base data offset is bound after the
/// enclosing `moof` has been sized.
pub struct TfhdBox {
    header: BoxHeader,
    pub track_id: u32,
    pub base_data_offset: Slot<u64>,
    pub default_sample_duration: u32,
}

impl TfhdBox {
    pub fn new(track_id: u32, default_sample_duration: u32) -> Self {
        Self {
            header: BoxHeader::full(
                FourCc::TFHD,
                0,
                TF_BASE_DATA_OFFSET_PRESENT | TF_DEFAULT_SAMPLE_DURATION_PRESENT,
            ),
            track_id,
            base_data_offset: Slot::new(),
            default_sample_duration,
        }
    }
}

impl MuxNode for TfhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(16)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let base_data_offset = self.base_data_offset.resolve("base_data_offset")?;
        self.header.write_with(out, |out| {
            out.put_u32(self.track_id)?;
            out.put_u64(base_data_offset)?;
            out.put_u32(self.default_sample_duration)
        })
    }
}

/// One `trun` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunSample {
    pub size: u32,
    pub flags: u32,
}

/// Track run box listing per-sample sizes, and flags when the track has
/// non-sync samples.
pub struct TrunBox {
    header: BoxHeader,
    pub samples: Vec<TrunSample>,
}

impl TrunBox {
    pub fn new(samples: Vec<TrunSample>, with_flags: bool) -> Self {
        let mut flags = TR_SAMPLE_SIZE_PRESENT;
        if with_flags {
            flags |= TR_SAMPLE_FLAGS_PRESENT;
        }
        Self {
            header: BoxHeader::full(FourCc::TRUN, 0, flags),
            samples,
        }
    }

    fn has_flags(&self) -> bool {
        self.header.flags() & TR_SAMPLE_FLAGS_PRESENT != 0
    }

    fn entry_len(&self) -> u64 {
        if self.has_flags() {
            8
        } else {
            4
        }
    }
}

impl MuxNode for TrunBox {
    fn generate(&mut self) -> Result<u64> {
        let payload = 4 + self.entry_len() * self.samples.len() as u64;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let with_flags = self.has_flags();
        self.header.write_with(out, |out| {
            out.put_u32(self.samples.len() as u32)?;
            for sample in &self.samples {
                out.put_u32(sample.size)?;
                if with_flags {
                    out.put_u32(sample.flags)?;
                }
            }
            Ok(())
        })
    }
}

/// Media data box holding the concatenated sample bytes.
pub struct MdatBox {
    header: BoxHeader,
    pub payload: Vec<Bytes>,
}

impl MdatBox {
    pub fn new(payload: Vec<Bytes>) -> Self {
        Self {
            header: BoxHeader::new(FourCc::MDAT),
            payload,
        }
    }
}

impl MuxNode for MdatBox {
    fn generate(&mut self) -> Result<u64> {
        let len = self.payload.iter().map(|p| p.len() as u64).sum();
        self.header.generate(len)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            for chunk in &self.payload {
                out.put_slice(chunk)?;
            }
            Ok(())
        })
    }
}

leaf_box!(MfhdBox, TfhdBox, TrunBox, MdatBox);

/// One `moof` + `mdat` pair for a single track.
pub struct FragmentUnit {
    pub moof: ContainerBox,
    pub mdat: MdatBox,
    base_data_offset: Slot<u64>,
    /// Whether the first sample is a sync sample.
    pub starts_with_sync: bool,
}

impl FragmentUnit {
    /// Build the boxes for `samples` of `track`.
    pub fn new(track: &Track, sequence_number: u32, samples: Vec<EncodedFrame>) -> Result<Self> {
        let with_flags = track.kind() == TrackKind::Video;
        let mut entries = Vec::with_capacity(samples.len());
        let mut payload = Vec::with_capacity(samples.len());
        for frame in samples {
            let size = u32::try_from(frame.data.len()).map_err(|_| MuxError::OffsetOverflow {
                field: "sample_size",
                value: frame.data.len() as u64,
            })?;
            let flags = if frame.frame_type.is_sync() {
                SAMPLE_FLAGS_SYNC
            } else {
                SAMPLE_FLAGS_NON_SYNC
            };
            entries.push(TrunSample { size, flags });
            payload.push(frame.data);
        }
        let starts_with_sync = entries
            .first()
            .is_some_and(|s| s.flags == SAMPLE_FLAGS_SYNC);

        let tfhd = TfhdBox::new(track.id, track.metadata.default_sample_duration());
        let base_data_offset = tfhd.base_data_offset.clone();
        let traf = ContainerBox::new(FourCc::TRAF)
            .child(tfhd)
            .child(TrunBox::new(entries, with_flags));
        let moof = ContainerBox::new(FourCc::MOOF)
            .child(MfhdBox::new(sequence_number))
            .child(traf);

        Ok(Self {
            moof,
            mdat: MdatBox::new(payload),
            base_data_offset,
            starts_with_sync,
        })
    }

    /// Size both boxes, bind the base data offset to the first sample byte
    /// and write the unit. Returns the absolute offset of the `moof`.
    pub fn write(mut self, out: &mut Compositor) -> Result<u64> {
        let moof_offset = out.position();
        let moof_size = self.moof.generate()?;
        self.mdat.generate()?;
        self.base_data_offset
            .set(moof_offset + moof_size + MDAT_HEADER_LEN);

        self.moof.write(out)?;
        self.mdat.write(out)?;
        Ok(moof_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::MuxBox;
    use crate::frame::FrameType;
    use crate::metadata::{AudioMetadata, TrackMetadata, VideoMetadata};

    fn audio_track(c: &mut Compositor) -> &Track {
        c.add_track(TrackMetadata::Audio(AudioMetadata::aac_lc(48000, 2)), 10)
            .unwrap();
        c.track(TrackKind::Audio).unwrap()
    }

    #[test]
    fn test_tfhd_requires_bound_offset() {
        let mut tfhd = TfhdBox::new(1, 1024);
        assert_eq!(tfhd.generate().unwrap(), 28);
        let mut out = Compositor::new();
        let err = tfhd.write(&mut out).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Mux(MuxError::UnresolvedSlot("base_data_offset"))
        ));
        assert_eq!(out.buffered(), 0);
    }

    #[test]
    fn test_trun_layout() {
        let samples = vec![
            TrunSample { size: 10, flags: 0 },
            TrunSample { size: 20, flags: 0 },
        ];
        let mut trun = TrunBox::new(samples.clone(), false);
        assert_eq!(trun.generate().unwrap(), 12 + 4 + 8);
        let mut flagged = TrunBox::new(samples, true);
        assert_eq!(flagged.generate().unwrap(), 12 + 4 + 16);

        let mut out = Compositor::new();
        trun.write(&mut out).unwrap();
        let bytes = out.take_output();
        assert_eq!(&bytes[8..12], &[0, 0, 0x02, 0x00]);
        assert_eq!(&bytes[12..24], &[0, 0, 0, 2, 0, 0, 0, 10, 0, 0, 0, 20]);
    }

    #[test]
    fn test_unit_patches_base_data_offset() {
        let mut c = Compositor::new();
        c.put_zeros(100).unwrap();
        c.take_output();

        let track = audio_track(&mut c);
        let frames = (0..3)
            .map(|i| EncodedFrame::new(vec![i as u8; 5], FrameType::AudioSample, i * 21_333))
            .collect();
        let unit = FragmentUnit::new(track, 1, frames).unwrap();
        let base = unit.base_data_offset.clone();
        let moof_offset = unit.write(&mut c).unwrap();
        let bytes = c.take_output();

        assert_eq!(moof_offset, 100);
        let moof_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
        // mfhd 16 + traf (8 + tfhd 28 + trun 12 + 4 + 3 * 4)
        assert_eq!(moof_size, 8 + 16 + 8 + 28 + 28);
        assert_eq!(base.get(), Some(100 + moof_size + MDAT_HEADER_LEN));
        assert_eq!(bytes.len() as u64, moof_size + 8 + 15);

        let moof: Box<dyn MuxBox> = Box::new(ContainerBox::new(FourCc::MOOF));
        assert!(moof.find(FourCc::TFHD).is_none());
    }

    #[test]
    fn test_video_unit_carries_sample_flags() {
        let mut c = Compositor::new();
        c.add_track(
            TrackMetadata::Video(VideoMetadata {
                width: 320,
                height: 240,
                clock_rate: 90000,
                frame_rate: 30,
            }),
            1,
        )
        .unwrap();
        let track = c.track(TrackKind::Video).unwrap();
        let frames = vec![
            EncodedFrame::new(vec![0, 0, 0, 1, 0x65], FrameType::VideoIFrame, 0),
            EncodedFrame::new(vec![0, 0, 0, 1, 0x41], FrameType::VideoPFrame, 33_333),
        ];
        let unit = FragmentUnit::new(track, 7, frames).unwrap();
        assert!(unit.starts_with_sync);

        let moof: &dyn MuxBox = &unit.moof;
        let trun = moof
            .find(FourCc::TRUN)
            .and_then(|b| b.downcast_ref::<TrunBox>())
            .unwrap();
        assert_eq!(trun.samples[0].flags, SAMPLE_FLAGS_SYNC);
        assert_eq!(trun.samples[1].flags, SAMPLE_FLAGS_NON_SYNC);
        let tfhd = moof
            .find(FourCc::TFHD)
            .and_then(|b| b.downcast_ref::<TfhdBox>())
            .unwrap();
        assert_eq!(tfhd.default_sample_duration, 3000);
        let mfhd = moof
            .find(FourCc::MFHD)
            .and_then(|b| b.downcast_ref::<MfhdBox>())
            .unwrap();
        assert_eq!(mfhd.sequence_number, 7);
    }
}
