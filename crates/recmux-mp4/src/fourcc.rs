//! Four-character box codes.

use std::fmt;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const SMHD: Self = Self(*b"smhd");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const DREF: Self = Self(*b"dref");
    pub const URL: Self = Self(*b"url ");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ESDS: Self = Self(*b"esds");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVCC: Self = Self(*b"avcC");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MFRA: Self = Self(*b"mfra");
    pub const TFRA: Self = Self(*b"tfra");
    pub const MFRO: Self = Self(*b"mfro");

    /// Brands used in `ftyp`.
    pub const BRAND_M4A: Self = Self(*b"M4A ");
    pub const BRAND_MP42: Self = Self(*b"MP42");
    pub const BRAND_ISOM: Self = Self(*b"isom");
    pub const BRAND_MP42_COMPAT: Self = Self(*b"mp42");

    /// Handler types used in `hdlr`.
    pub const SOUN: Self = Self(*b"soun");
    pub const VIDE: Self = Self(*b"vide");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    /// The code as a big-endian integer.
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Whether the box holds only child boxes.
    pub fn is_container(&self) -> bool {
        matches!(
            *self,
            Self::MOOV
                | Self::TRAK
                | Self::MDIA
                | Self::MINF
                | Self::DINF
                | Self::STBL
                | Self::MVEX
                | Self::MOOF
                | Self::TRAF
                | Self::MFRA
        )
    }
}

impl From<[u8; 4]> for FourCc {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}
