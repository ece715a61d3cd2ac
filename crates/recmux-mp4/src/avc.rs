//! H.264 bitstream helpers.
//!
//! Encoders hand over Annex B byte streams (start-code delimited). MP4
//! samples carry 4-byte length-prefixed NAL units instead, and the sample
//! description needs an AVCDecoderConfigurationRecord built from the SPS
//! and PPS.

use crate::error::{MuxError, Result};
use crate::metadata::TrackKind;
use bytes::{BufMut, Bytes, BytesMut};

/// NAL unit type of a sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set.
pub const NAL_PPS: u8 = 8;
/// NAL unit type of an IDR slice.
pub const NAL_IDR: u8 = 5;

/// Length of the NAL size prefix written into samples.
pub const NAL_LENGTH_SIZE: u8 = 4;

/// Split a stream of 4-byte length-prefixed NAL units.
///
/// Returns `None` unless every prefix is non-zero and the units cover
/// `data` exactly.
pub fn split_length_prefixed(data: &[u8]) -> Option<Vec<&[u8]>> {
    let mut nals = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let (prefix, tail) = rest.split_first_chunk::<4>()?;
        let len = u32::from_be_bytes(*prefix) as usize;
        if len == 0 || len > tail.len() {
            return None;
        }
        let (nal, next) = tail.split_at(len);
        nals.push(nal);
        rest = next;
    }
    (!nals.is_empty()).then_some(nals)
}

/// Whether `data` is already made of 4-byte length-prefixed NAL units.
pub fn is_length_prefixed(data: &[u8]) -> bool {
    split_length_prefixed(data).is_some()
}

/// Whether `data` is an Annex B stream.
///
/// A sample whose first NAL is 256 to 511 bytes long starts with
/// `00 00 01` in length-prefixed form too, so the length walk wins.
pub fn is_annexb(data: &[u8]) -> bool {
    (data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1]))
        && !is_length_prefixed(data)
}

/// NAL unit type from the first header byte.
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Split an Annex B stream into NAL unit payloads (start codes removed).
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    // (start of the start code, first byte after it)
    let mut codes = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            codes.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(codes.len());
    for (idx, &(_, begin)) in codes.iter().enumerate() {
        let end = codes.get(idx + 1).map_or(data.len(), |&(next, _)| next);
        // Drop trailing zero bytes, including the leading zero of a 4-byte code.
        let mut nal = &data[begin..end];
        while let [rest @ .., 0] = nal {
            nal = rest;
        }
        if !nal.is_empty() {
            nals.push(nal);
        }
    }
    nals
}

/// Rewrite an Annex B access unit with 4-byte big-endian length prefixes.
pub fn to_length_prefixed(data: &[u8]) -> Bytes {
    let nals = split_annexb(data);
    let mut out = BytesMut::with_capacity(data.len() + nals.len() * 4);
    for nal in nals {
        out.put_u32(nal.len() as u32);
        out.put_slice(nal);
    }
    out.freeze()
}

/// Build an AVCDecoderConfigurationRecord (ISO/IEC 14496-15 5.2.4.1) from
/// Annex B parameter sets.
pub fn decoder_configuration_record(annexb: &[u8]) -> Result<Bytes> {
    record_from_nals(&split_annexb(annexb))
}

/// Build an AVCDecoderConfigurationRecord from parameter set NAL units.
pub fn record_from_nals(nals: &[&[u8]]) -> Result<Bytes> {
    let sps: Vec<&[u8]> = nals
        .iter()
        .copied()
        .filter(|n| nal_type(n) == Some(NAL_SPS))
        .collect();
    let pps: Vec<&[u8]> = nals
        .iter()
        .copied()
        .filter(|n| nal_type(n) == Some(NAL_PPS))
        .collect();

    let first = match sps.first() {
        Some(first) if first.len() >= 4 && !pps.is_empty() => *first,
        _ => return Err(MuxError::MissingCodecConfig(TrackKind::Video).into()),
    };
    if sps.len() > 31 || pps.len() > 255 {
        return Err(MuxError::OffsetOverflow {
            field: "parameter set count",
            value: sps.len().max(pps.len()) as u64,
        }
        .into());
    }

    let mut out = BytesMut::new();
    out.put_u8(1); // configurationVersion
    out.put_u8(first[1]); // AVCProfileIndication
    out.put_u8(first[2]); // profile_compatibility
    out.put_u8(first[3]); // AVCLevelIndication
    out.put_u8(0xFC | (NAL_LENGTH_SIZE - 1));
    out.put_u8(0xE0 | sps.len() as u8);
    for set in &sps {
        put_parameter_set(&mut out, set)?;
    }
    out.put_u8(pps.len() as u8);
    for set in &pps {
        put_parameter_set(&mut out, set)?;
    }
    Ok(out.freeze())
}

fn put_parameter_set(out: &mut BytesMut, set: &[u8]) -> Result<()> {
    let len = u16::try_from(set.len()).map_err(|_| MuxError::OffsetOverflow {
        field: "parameter set length",
        value: set.len() as u64,
    })?;
    out.put_u16(len);
    out.put_slice(set);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const SPS: [u8; 6] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02];
    const PPS: [u8; 3] = [0x68, 0xCE, 0x3C];

    fn parameter_sets() -> Vec<u8> {
        let mut v = vec![0, 0, 0, 1];
        v.extend_from_slice(&SPS);
        v.extend_from_slice(&[0, 0, 1]);
        v.extend_from_slice(&PPS);
        v
    }

    #[test]
    fn test_split_mixed_start_codes() {
        let data = [0, 0, 0, 1, 0x65, 1, 2, 0, 0, 1, 0x41, 3, 0, 0, 0, 1, 0x06, 4];
        let nals = split_annexb(&data);
        assert_eq!(nals, vec![&[0x65, 1, 2][..], &[0x41, 3][..], &[0x06, 4][..]]);
        assert_eq!(nal_type(nals[0]), Some(NAL_IDR));
    }

    #[test]
    fn test_length_prefixed() {
        let data = [0, 0, 1, 0x65, 0xAA, 0, 0, 0, 1, 0x41];
        assert_eq!(
            to_length_prefixed(&data).as_ref(),
            &[0, 0, 0, 2, 0x65, 0xAA, 0, 0, 0, 1, 0x41]
        );
    }

    #[test]
    fn test_decoder_configuration_record() {
        let record = decoder_configuration_record(&parameter_sets()).unwrap();
        let mut expected = vec![1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0, 6];
        expected.extend_from_slice(&SPS);
        expected.extend_from_slice(&[1, 0, 3]);
        expected.extend_from_slice(&PPS);
        assert_eq!(record.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_missing_pps_is_error() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(&SPS);
        let err = decoder_configuration_record(&data).unwrap_err();
        assert!(matches!(
            err,
            Error::Mux(MuxError::MissingCodecConfig(TrackKind::Video))
        ));
    }

    #[test]
    fn test_detect_annexb() {
        assert!(is_annexb(&[0, 0, 1, 0x67]));
        assert!(is_annexb(&[0, 0, 0, 1, 0x67, 0x42]));
        assert!(!is_annexb(&[1, 0x42, 0xC0]));
    }

    #[test]
    fn test_length_prefixed_300_byte_nal_is_not_annexb() {
        let mut sample = vec![0, 0, 1, 0x2C, 0x65];
        sample.extend(std::iter::repeat(0xAB).take(299));
        assert!(is_length_prefixed(&sample));
        assert!(!is_annexb(&sample));
        assert_eq!(split_length_prefixed(&sample).unwrap()[0].len(), 300);
    }

    #[test]
    fn test_split_length_prefixed_rejects_mismatch() {
        assert!(split_length_prefixed(&[0, 0, 0, 2, 0x65]).is_none());
        assert!(split_length_prefixed(&[0, 0, 0, 0]).is_none());
        assert!(split_length_prefixed(&[0, 0, 1]).is_none());
        assert!(split_length_prefixed(&[]).is_none());
        let two = [0, 0, 0, 1, 0x65, 0, 0, 0, 2, 0x41, 0x9A];
        assert_eq!(split_length_prefixed(&two).unwrap().len(), 2);
    }

    #[test]
    fn test_record_from_length_prefixed_sets() {
        let mut data = vec![0, 0, 0, SPS.len() as u8];
        data.extend_from_slice(&SPS);
        data.extend_from_slice(&[0, 0, 0, PPS.len() as u8]);
        data.extend_from_slice(&PPS);
        let nals = split_length_prefixed(&data).unwrap();
        assert_eq!(
            record_from_nals(&nals).unwrap(),
            decoder_configuration_record(&parameter_sets()).unwrap()
        );
    }
}
