//! Read-back of produced byte streams into a box tree.

use crate::error::{Error, Result};
use crate::fourcc::FourCc;

/// Bytes preceding the child boxes of boxes that mix fields and children.
fn child_offset(tag: FourCc) -> Option<u64> {
    if tag.is_container() {
        return Some(0);
    }
    match tag {
        FourCc::DREF | FourCc::STSD => Some(8),
        FourCc::MP4A => Some(28),
        FourCc::AVC1 => Some(78),
        _ => None,
    }
}

/// A parsed box header and its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxInfo {
    pub tag: FourCc,
    /// Offset of the box header within the parsed data.
    pub offset: u64,
    /// Total size including the header.
    pub size: u64,
    pub header_size: u8,
    pub children: Vec<BoxInfo>,
}

impl BoxInfo {
    /// Depth-first search across this box and its descendants.
    pub fn find(&self, tag: FourCc) -> Option<&BoxInfo> {
        if self.tag == tag {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(tag))
    }

    /// Payload bytes (after the header) of this box within `data`.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = (self.offset + self.header_size as u64) as usize;
        let end = (self.offset + self.size) as usize;
        &data[start.min(data.len())..end.min(data.len())]
    }
}

/// Find the first box with `tag` in a forest.
pub fn find<'a>(boxes: &'a [BoxInfo], tag: FourCc) -> Option<&'a BoxInfo> {
    boxes.iter().find_map(|b| b.find(tag))
}

/// Parse every box in `data`, recursing into known parents.
pub fn parse_boxes(data: &[u8]) -> Result<Vec<BoxInfo>> {
    parse_range(data, 0, data.len() as u64)
}

fn parse_range(data: &[u8], start: u64, end: u64) -> Result<Vec<BoxInfo>> {
    let mut boxes = Vec::new();
    let mut pos = start;

    while pos < end {
        let at = pos as usize;
        let header = data
            .get(at..at + 8)
            .ok_or_else(|| Error::InvalidMp4(format!("truncated box header at {pos}")))?;
        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let tag = FourCc([header[4], header[5], header[6], header[7]]);

        let (size, header_size) = match size {
            1 => {
                let ext = data
                    .get(at + 8..at + 16)
                    .ok_or_else(|| Error::InvalidMp4(format!("truncated size of '{tag}'")))?;
                let mut wide = [0u8; 8];
                wide.copy_from_slice(ext);
                (u64::from_be_bytes(wide), 16u8)
            }
            0 => (end - pos, 8u8),
            size => (size, 8u8),
        };

        if size < header_size as u64 || size > end - pos {
            return Err(Error::InvalidMp4(format!(
                "box '{tag}' at {pos} has invalid size {size}"
            )));
        }

        let children = match child_offset(tag) {
            Some(skip) => {
                let first = pos + header_size as u64 + skip;
                if first > pos + size {
                    return Err(Error::InvalidMp4(format!("box '{tag}' too small for its fields")));
                }
                parse_range(data, first, pos + size)?
            }
            None => Vec::new(),
        };

        boxes.push(BoxInfo {
            tag,
            offset: pos,
            size,
            header_size,
            children,
        });
        pos += size;
    }

    Ok(boxes)
}
