//! Header boxes: `ftyp` and the `moov` tree (ISO/IEC 14496-12 8.2 - 8.8,
//! 14496-14 5.6, 14496-15 5.3.4).
//!
//! Sample tables are empty; all samples live in movie fragments.

use super::{leaf_box, BoxHeader, ContainerBox, MuxBox, MuxNode};
use crate::compositor::{Compositor, Track};
use crate::descriptor::{self, EsDescriptor};
use crate::error::{MuxError, Result};
use crate::fourcc::FourCc;
use crate::metadata::{AudioMetadata, TrackKind, TrackMetadata, VideoMetadata};
use bytes::Bytes;
use std::any::Any;

/// Movie timescale (ticks per second) used by `mvhd`.
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Unity transformation matrix (14496-12 8.2.2.3).
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// `tkhd` flags: track_enabled | track_in_movie | track_in_preview.
const TKHD_FLAGS: u32 = 0x000007;
/// `url ` flag: media data is in the same file.
const URL_SELF_CONTAINED: u32 = 0x000001;
/// Non-sync sample flags: sample_depends_on = 1, sample_is_non_sync_sample.
pub const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;
/// Sync sample flags: sample_depends_on = 2.
pub const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;

fn write_matrix(out: &mut Compositor) -> Result<()> {
    for value in UNITY_MATRIX {
        out.put_u32(value)?;
    }
    Ok(())
}

/// Sum of the generated sizes of `children`.
fn generate_children(children: &mut [Box<dyn MuxBox>]) -> Result<u64> {
    let mut total = 0;
    for child in children {
        total += child.generate()?;
    }
    Ok(total)
}

fn write_children(children: &[Box<dyn MuxBox>], out: &mut Compositor) -> Result<()> {
    for child in children {
        child.write(out)?;
    }
    Ok(())
}

/// Implements [`MuxBox`] for a box whose child boxes live in `children`.
macro_rules! parent_box {
    ($($ty:ty),+ $(,)?) => {$(
        impl MuxBox for $ty {
            fn tag(&self) -> FourCc {
                self.header.tag()
            }

            fn children(&self) -> &[Box<dyn MuxBox>] {
                &self.children
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    )+};
}

// ---------------------------------------------------------------------------
// ftyp
// ---------------------------------------------------------------------------

/// File type box.
pub struct FtypBox {
    header: BoxHeader,
    pub major_brand: FourCc,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCc>,
}

impl FtypBox {
    /// `"M4A "` for audio-only files, `"MP42"` otherwise.
    pub fn for_tracks(has_video: bool) -> Self {
        let major_brand = if has_video {
            FourCc::BRAND_MP42
        } else {
            FourCc::BRAND_M4A
        };
        Self {
            header: BoxHeader::new(FourCc::FTYP),
            major_brand,
            minor_version: 0,
            compatible_brands: vec![FourCc::BRAND_ISOM, FourCc::BRAND_MP42_COMPAT],
        }
    }
}

impl MuxNode for FtypBox {
    fn generate(&mut self) -> Result<u64> {
        self.header
            .generate(8 + 4 * self.compatible_brands.len() as u64)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_fourcc(self.major_brand)?;
            out.put_u32(self.minor_version)?;
            for brand in &self.compatible_brands {
                out.put_fourcc(*brand)?;
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// mvhd, tkhd, mdhd, hdlr
// ---------------------------------------------------------------------------

/// Movie header box (version 0).
pub struct MvhdBox {
    header: BoxHeader,
    pub creation_time: u32,
    pub modification_time: u32,
    pub timescale: u32,
    pub duration: u32,
    pub next_track_id: u32,
}

impl MvhdBox {
    pub fn new(creation_time: u32, next_track_id: u32) -> Self {
        Self {
            header: BoxHeader::full(FourCc::MVHD, 0, 0),
            creation_time,
            modification_time: creation_time,
            timescale: MOVIE_TIMESCALE,
            duration: 0,
            next_track_id,
        }
    }
}

impl MuxNode for MvhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(96)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.creation_time)?;
            out.put_u32(self.modification_time)?;
            out.put_u32(self.timescale)?;
            out.put_u32(self.duration)?;
            out.put_u32(0x0001_0000)?; // rate 1.0
            out.put_u16(0x0100)?; // volume 1.0
            out.put_zeros(10)?;
            write_matrix(out)?;
            out.put_zeros(24)?; // pre_defined
            out.put_u32(self.next_track_id)
        })
    }
}

/// Track header box (version 0).
pub struct TkhdBox {
    header: BoxHeader,
    pub creation_time: u32,
    pub modification_time: u32,
    pub track_id: u32,
    pub duration: u32,
    /// 8.8 fixed point, 0x0100 for audio tracks and 0 otherwise.
    pub volume: u16,
    /// Width and height in pixels; written as 16.16.
    pub width: u16,
    pub height: u16,
}

impl TkhdBox {
    pub fn new(track_id: u32, creation_time: u32, metadata: &TrackMetadata) -> Self {
        let (volume, width, height) = match metadata {
            TrackMetadata::Audio(_) => (0x0100, 0, 0),
            TrackMetadata::Video(video) => (0, video.width as u16, video.height as u16),
        };
        Self {
            header: BoxHeader::full(FourCc::TKHD, 0, TKHD_FLAGS),
            creation_time,
            modification_time: creation_time,
            track_id,
            duration: 0,
            volume,
            width,
            height,
        }
    }
}

impl MuxNode for TkhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(80)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.creation_time)?;
            out.put_u32(self.modification_time)?;
            out.put_u32(self.track_id)?;
            out.put_u32(0)?;
            out.put_u32(self.duration)?;
            out.put_zeros(8)?;
            out.put_i16(0)?; // layer
            out.put_i16(0)?; // alternate_group
            out.put_u16(self.volume)?;
            out.put_u16(0)?;
            write_matrix(out)?;
            out.put_u32((self.width as u32) << 16)?;
            out.put_u32((self.height as u32) << 16)
        })
    }
}

/// Media header box (version 0).
pub struct MdhdBox {
    header: BoxHeader,
    pub creation_time: u32,
    pub modification_time: u32,
    pub timescale: u32,
    pub duration: u32,
    /// ISO-639-2/T code, three lowercase letters.
    pub language: [u8; 3],
}

impl MdhdBox {
    pub fn new(creation_time: u32, timescale: u32) -> Self {
        Self {
            header: BoxHeader::full(FourCc::MDHD, 0, 0),
            creation_time,
            modification_time: creation_time,
            timescale,
            duration: 0,
            language: *b"und",
        }
    }
}

impl MuxNode for MdhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(20)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.creation_time)?;
            out.put_u32(self.modification_time)?;
            out.put_u32(self.timescale)?;
            out.put_u32(self.duration)?;
            out.write_bits(0, 1)?; // pad
            for letter in self.language {
                out.write_bits(u64::from(letter.wrapping_sub(0x60) & 0x1F), 5)?;
            }
            out.put_u16(0) // pre_defined
        })
    }
}

/// Handler reference box.
pub struct HdlrBox {
    header: BoxHeader,
    pub handler_type: FourCc,
    /// Written null-terminated.
    pub name: String,
}

impl HdlrBox {
    pub fn for_kind(kind: TrackKind) -> Self {
        let (handler_type, name) = match kind {
            TrackKind::Audio => (FourCc::SOUN, "SoundHandler"),
            TrackKind::Video => (FourCc::VIDE, "VideoHandler"),
        };
        Self {
            header: BoxHeader::full(FourCc::HDLR, 0, 0),
            handler_type,
            name: name.to_string(),
        }
    }
}

impl MuxNode for HdlrBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(20 + self.name.len() as u64 + 1)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(0)?; // pre_defined
            out.put_fourcc(self.handler_type)?;
            out.put_zeros(12)?;
            out.put_slice(self.name.as_bytes())?;
            out.put_u8(0)
        })
    }
}

// ---------------------------------------------------------------------------
// minf children
// ---------------------------------------------------------------------------

/// Sound media header box.
pub struct SmhdBox {
    header: BoxHeader,
    /// 8.8 fixed point stereo balance.
    pub balance: i16,
}

impl SmhdBox {
    pub fn new() -> Self {
        Self {
            header: BoxHeader::full(FourCc::SMHD, 0, 0),
            balance: 0,
        }
    }
}

impl Default for SmhdBox {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxNode for SmhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(4)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_i16(self.balance)?;
            out.put_u16(0)
        })
    }
}

/// Video media header box.
pub struct VmhdBox {
    header: BoxHeader,
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

impl VmhdBox {
    pub fn new() -> Self {
        Self {
            header: BoxHeader::full(FourCc::VMHD, 0, 1),
            graphics_mode: 0,
            opcolor: [0; 3],
        }
    }
}

impl Default for VmhdBox {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxNode for VmhdBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(8)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u16(self.graphics_mode)?;
            for c in self.opcolor {
                out.put_u16(c)?;
            }
            Ok(())
        })
    }
}

/// Data entry URL box; no location means "this file".
pub struct UrlBox {
    header: BoxHeader,
}

impl UrlBox {
    pub fn self_contained() -> Self {
        Self {
            header: BoxHeader::full(FourCc::URL, 0, URL_SELF_CONTAINED),
        }
    }
}

impl MuxNode for UrlBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(0)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |_| Ok(()))
    }
}

/// Data reference box.
pub struct DrefBox {
    header: BoxHeader,
    children: Vec<Box<dyn MuxBox>>,
}

impl DrefBox {
    pub fn self_contained() -> Self {
        Self {
            header: BoxHeader::full(FourCc::DREF, 0, 0),
            children: vec![Box::new(UrlBox::self_contained())],
        }
    }
}

impl MuxNode for DrefBox {
    fn generate(&mut self) -> Result<u64> {
        let payload = 4 + generate_children(&mut self.children)?;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.children.len() as u32)?;
            write_children(&self.children, out)
        })
    }
}

// ---------------------------------------------------------------------------
// Sample table
// ---------------------------------------------------------------------------

/// Sample description box.
pub struct StsdBox {
    header: BoxHeader,
    children: Vec<Box<dyn MuxBox>>,
}

impl StsdBox {
    pub fn new(entry: Box<dyn MuxBox>) -> Self {
        Self {
            header: BoxHeader::full(FourCc::STSD, 0, 0),
            children: vec![entry],
        }
    }
}

impl MuxNode for StsdBox {
    fn generate(&mut self) -> Result<u64> {
        let payload = 4 + generate_children(&mut self.children)?;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.children.len() as u32)?;
            write_children(&self.children, out)
        })
    }
}

/// Declares a full box holding only an entry count, which stays 0 in
/// fragmented files.
macro_rules! empty_table_box {
    ($name:ident, $tag:expr, $doc:literal) => {
        #[doc = $doc]
        pub struct $name {
            header: BoxHeader,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    header: BoxHeader::full($tag, 0, 0),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl MuxNode for $name {
            fn generate(&mut self) -> Result<u64> {
                self.header.generate(4)
            }

            fn write(&self, out: &mut Compositor) -> Result<()> {
                self.header.write_with(out, |out| out.put_u32(0))
            }
        }
    };
}

empty_table_box!(SttsBox, FourCc::STTS, "Decoding time to sample box.");
empty_table_box!(StscBox, FourCc::STSC, "Sample to chunk box.");
empty_table_box!(StcoBox, FourCc::STCO, "Chunk offset box.");

/// Sample size box.
pub struct StszBox {
    header: BoxHeader,
    pub sample_size: u32,
    pub sample_count: u32,
}

impl StszBox {
    pub fn new() -> Self {
        Self {
            header: BoxHeader::full(FourCc::STSZ, 0, 0),
            sample_size: 0,
            sample_count: 0,
        }
    }
}

impl Default for StszBox {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxNode for StszBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(8)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.sample_size)?;
            out.put_u32(self.sample_count)
        })
    }
}

// ---------------------------------------------------------------------------
// Sample entries
// ---------------------------------------------------------------------------

/// `SampleEntry` fields: six reserved bytes and the data reference index.
fn write_sample_entry_prefix(out: &mut Compositor, data_reference_index: u16) -> Result<()> {
    out.put_zeros(6)?;
    out.put_u16(data_reference_index)
}

/// Elementary stream descriptor box.
pub struct EsdsBox {
    header: BoxHeader,
    pub descriptor: EsDescriptor,
}

impl EsdsBox {
    pub fn new(descriptor: EsDescriptor) -> Self {
        Self {
            header: BoxHeader::full(FourCc::ESDS, 0, 0),
            descriptor,
        }
    }
}

impl MuxNode for EsdsBox {
    fn generate(&mut self) -> Result<u64> {
        let payload = self.descriptor.generate()?;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header
            .write_with(out, |out| self.descriptor.write(out))
    }
}

/// MPEG-4 audio sample entry.
pub struct Mp4aBox {
    header: BoxHeader,
    pub data_reference_index: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: u32,
    children: Vec<Box<dyn MuxBox>>,
}

impl Mp4aBox {
    /// Sample entry for an AAC track, embedding `config` in its `esds`.
    pub fn aac(audio: &AudioMetadata, config: Bytes) -> Self {
        Self {
            header: BoxHeader::new(FourCc::MP4A),
            data_reference_index: 1,
            channel_count: audio.channels,
            sample_size: 16,
            sample_rate: audio.sample_rate,
            children: vec![Box::new(EsdsBox::new(EsDescriptor::aac(audio, config)))],
        }
    }
}

impl MuxNode for Mp4aBox {
    fn generate(&mut self) -> Result<u64> {
        let payload = 28 + generate_children(&mut self.children)?;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        // 16.16 field; rates above 65535 are carried by the AudioSpecificConfig only.
        let rate = u16::try_from(self.sample_rate).unwrap_or(0);
        self.header.write_with(out, |out| {
            write_sample_entry_prefix(out, self.data_reference_index)?;
            out.put_zeros(8)?;
            out.put_u16(self.channel_count)?;
            out.put_u16(self.sample_size)?;
            out.put_u16(0)?; // pre_defined
            out.put_u16(0)?;
            out.put_u32((rate as u32) << 16)?;
            write_children(&self.children, out)
        })
    }
}

/// AVC decoder configuration box.
pub struct AvcCBox {
    header: BoxHeader,
    /// AVCDecoderConfigurationRecord bytes.
    pub record: Bytes,
}

impl AvcCBox {
    pub fn new(record: Bytes) -> Self {
        Self {
            header: BoxHeader::new(FourCc::AVCC),
            record,
        }
    }
}

impl MuxNode for AvcCBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(self.record.len() as u64)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| out.put_slice(&self.record))
    }
}

/// AVC visual sample entry.
pub struct Avc1Box {
    header: BoxHeader,
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    /// Up to 31 bytes, written as a length-prefixed 32 byte field.
    pub compressor_name: String,
    children: Vec<Box<dyn MuxBox>>,
}

impl Avc1Box {
    pub fn new(video: &VideoMetadata, record: Bytes) -> Self {
        Self {
            header: BoxHeader::new(FourCc::AVC1),
            data_reference_index: 1,
            width: video.width as u16,
            height: video.height as u16,
            compressor_name: String::new(),
            children: vec![Box::new(AvcCBox::new(record))],
        }
    }
}

impl MuxNode for Avc1Box {
    fn generate(&mut self) -> Result<u64> {
        let payload = 78 + generate_children(&mut self.children)?;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let name = self.compressor_name.as_bytes();
        let name = &name[..name.len().min(31)];
        self.header.write_with(out, |out| {
            write_sample_entry_prefix(out, self.data_reference_index)?;
            out.put_zeros(16)?; // pre_defined, reserved
            out.put_u16(self.width)?;
            out.put_u16(self.height)?;
            out.put_u32(0x0048_0000)?; // 72 dpi
            out.put_u32(0x0048_0000)?;
            out.put_u32(0)?;
            out.put_u16(1)?; // frame_count
            out.put_u8(name.len() as u8)?;
            out.put_slice(name)?;
            out.put_zeros(31 - name.len())?;
            out.put_u16(0x0018)?; // depth
            out.put_i16(-1)?; // pre_defined
            write_children(&self.children, out)
        })
    }
}

// ---------------------------------------------------------------------------
// mvex
// ---------------------------------------------------------------------------

/// Track extends box: per-track defaults for movie fragments.
pub struct TrexBox {
    header: BoxHeader,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TrexBox {
    pub fn new(track_id: u32, metadata: &TrackMetadata) -> Self {
        let (size, flags) = match metadata {
            TrackMetadata::Audio(audio) => (audio.frame_size, 0),
            TrackMetadata::Video(_) => (0, SAMPLE_FLAGS_NON_SYNC),
        };
        Self {
            header: BoxHeader::full(FourCc::TREX, 0, 0),
            track_id,
            default_sample_description_index: 1,
            default_sample_duration: metadata.default_sample_duration(),
            default_sample_size: size,
            default_sample_flags: flags,
        }
    }
}

impl MuxNode for TrexBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(20)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            out.put_u32(self.track_id)?;
            out.put_u32(self.default_sample_description_index)?;
            out.put_u32(self.default_sample_duration)?;
            out.put_u32(self.default_sample_size)?;
            out.put_u32(self.default_sample_flags)
        })
    }
}

leaf_box!(
    FtypBox, MvhdBox, TkhdBox, MdhdBox, HdlrBox, SmhdBox, VmhdBox, UrlBox, SttsBox, StscBox,
    StcoBox, StszBox, EsdsBox, AvcCBox, TrexBox,
);
parent_box!(DrefBox, StsdBox, Mp4aBox, Avc1Box);

// ---------------------------------------------------------------------------
// Tree construction
// ---------------------------------------------------------------------------

/// Codec configuration for a track's sample entry.
///
/// AAC falls back to an AudioSpecificConfig synthesized from metadata; AVC
/// has no such fallback.
pub fn sample_entry_config(track: &Track) -> Result<Bytes> {
    if let Some(config) = track.buffer.codec_config() {
        return Ok(config.clone());
    }
    match &track.metadata {
        TrackMetadata::Audio(audio) => descriptor::audio_specific_config(audio),
        TrackMetadata::Video(_) => Err(MuxError::MissingCodecConfig(TrackKind::Video).into()),
    }
}

fn track_box(track: &Track, creation_time: u32) -> Result<ContainerBox> {
    let config = sample_entry_config(track)?;
    let (media_header, entry): (Box<dyn MuxBox>, Box<dyn MuxBox>) = match &track.metadata {
        TrackMetadata::Audio(audio) => {
            (Box::new(SmhdBox::new()), Box::new(Mp4aBox::aac(audio, config)))
        }
        TrackMetadata::Video(video) => {
            (Box::new(VmhdBox::new()), Box::new(Avc1Box::new(video, config)))
        }
    };

    let stbl = ContainerBox::with_children(
        FourCc::STBL,
        vec![
            Box::new(StsdBox::new(entry)),
            Box::new(SttsBox::new()),
            Box::new(StscBox::new()),
            Box::new(StszBox::new()),
            Box::new(StcoBox::new()),
        ],
    );
    let minf = ContainerBox::with_children(
        FourCc::MINF,
        vec![
            media_header,
            Box::new(ContainerBox::new(FourCc::DINF).child(DrefBox::self_contained())),
            Box::new(stbl),
        ],
    );
    let mdia = ContainerBox::new(FourCc::MDIA)
        .child(MdhdBox::new(creation_time, track.metadata.timescale()))
        .child(HdlrBox::for_kind(track.kind()))
        .child(minf);

    Ok(ContainerBox::new(FourCc::TRAK)
        .child(TkhdBox::new(track.id, creation_time, &track.metadata))
        .child(mdia))
}

/// Build the `moov` tree for every registered track.
pub fn movie_box(compositor: &Compositor) -> Result<ContainerBox> {
    let creation_time = compositor.creation_time();
    let mut moov =
        ContainerBox::new(FourCc::MOOV).child(MvhdBox::new(creation_time, compositor.next_track_id()));
    let mut mvex = ContainerBox::new(FourCc::MVEX);
    for track in compositor.tracks() {
        moov.push(track_box(track, creation_time)?);
        mvex.push(TrexBox::new(track.id, &track.metadata));
    }
    moov.push(mvex);
    Ok(moov)
}
