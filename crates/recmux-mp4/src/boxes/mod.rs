//! ISO base-media box tree.
//!
//! Every node follows a two-phase protocol: [`MuxNode::generate`] computes
//! the serialized size of the node and its children, then
//! [`MuxNode::write`] appends exactly that many bytes to the
//! [`Compositor`]. Fields whose value is only known once the whole tree is
//! sized (a fragment's base data offset, the `mfro` size) are [`Slot`]s
//! resolved between the two phases.

pub mod fragment;
pub mod index;
pub mod movie;

use crate::compositor::Compositor;
use crate::error::{MuxError, Result};
use crate::fourcc::FourCc;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

pub use fragment::{MdatBox, MfhdBox, TfhdBox, TrunBox, TrunSample};
pub use index::{MfroBox, RandomAccessEntry, TfraBox};
pub use movie::{
    Avc1Box, AvcCBox, DrefBox, EsdsBox, FtypBox, HdlrBox, MdhdBox, Mp4aBox, MvhdBox, SmhdBox,
    StcoBox, StscBox, StsdBox, StszBox, SttsBox, TkhdBox, TrexBox, UrlBox, VmhdBox,
};

/// Two-phase serializable node.
pub trait MuxNode {
    /// Compute the total serialized size in bytes. Calling it again on an
    /// unchanged node returns the same value.
    fn generate(&mut self) -> Result<u64>;

    /// Serialize into `out`, emitting exactly the generated size.
    fn write(&self, out: &mut Compositor) -> Result<()>;
}

/// A box in the tree.
pub trait MuxBox: MuxNode + Any {
    fn tag(&self) -> FourCc;

    /// Child boxes in serialization order.
    fn children(&self) -> &[Box<dyn MuxBox>] {
        &[]
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn MuxBox {
    /// Depth-first search for `tag` across this box and its descendants.
    pub fn find(&self, tag: FourCc) -> Option<&dyn MuxBox> {
        if self.tag() == tag {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(tag))
    }

    pub fn downcast_ref<T: MuxBox>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// A late-bound field. Boxes hold one end, the writer resolves the other
/// after generation.
#[derive(Debug)]
pub struct Slot<T: Copy>(Rc<Cell<Option<T>>>);

impl<T: Copy> Slot<T> {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(None)))
    }

    pub fn set(&self, value: T) {
        self.0.set(Some(value));
    }

    pub fn get(&self) -> Option<T> {
        self.0.get()
    }

    /// The resolved value, or an error naming `field`.
    pub fn resolve(&self, field: &'static str) -> Result<T> {
        self.get()
            .ok_or_else(|| MuxError::UnresolvedSlot(field).into())
    }
}

impl<T: Copy> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

/// Size, tag and optional version/flags of a box.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    tag: FourCc,
    /// `(version, flags)` for full boxes.
    full: Option<(u8, u32)>,
    size: Option<u32>,
}

impl BoxHeader {
    pub fn new(tag: FourCc) -> Self {
        Self {
            tag,
            full: None,
            size: None,
        }
    }

    /// Header of a full box; only the low 24 bits of `flags` are used.
    pub fn full(tag: FourCc, version: u8, flags: u32) -> Self {
        Self {
            tag,
            full: Some((version, flags & 0x00FF_FFFF)),
            size: None,
        }
    }

    pub fn tag(&self) -> FourCc {
        self.tag
    }

    pub fn version(&self) -> u8 {
        self.full.map_or(0, |(v, _)| v)
    }

    pub fn flags(&self) -> u32 {
        self.full.map_or(0, |(_, f)| f)
    }

    /// Bytes taken by the header itself.
    pub fn header_len(&self) -> u64 {
        if self.full.is_some() {
            12
        } else {
            8
        }
    }

    /// Record the payload size and return the total box size.
    pub fn generate(&mut self, payload: u64) -> Result<u64> {
        let total = self.header_len() + payload;
        let size = u32::try_from(total).map_err(|_| MuxError::SizeOverflow {
            tag: self.tag,
            size: total,
        })?;
        self.size = Some(size);
        Ok(total)
    }

    /// Generated total size.
    pub fn size(&self) -> Result<u32> {
        self.size.ok_or_else(|| MuxError::NotGenerated(self.tag).into())
    }

    /// Write the header followed by `payload`, checking the byte count.
    pub fn write_with<F>(&self, out: &mut Compositor, payload: F) -> Result<()>
    where
        F: FnOnce(&mut Compositor) -> Result<()>,
    {
        let size = self.size()?;
        out.write_checked(self.tag, size as u64, |out| {
            out.put_u32(size)?;
            out.put_fourcc(self.tag)?;
            if let Some((version, flags)) = self.full {
                out.put_u8(version)?;
                out.write_bits(flags as u64, 24)?;
            }
            payload(out)
        })
    }
}

/// Box holding only child boxes (`moov`, `trak`, `moof`, `mfra`...).
pub struct ContainerBox {
    header: BoxHeader,
    children: Vec<Box<dyn MuxBox>>,
}

impl ContainerBox {
    pub fn new(tag: FourCc) -> Self {
        Self {
            header: BoxHeader::new(tag),
            children: Vec::new(),
        }
    }

    pub fn with_children(tag: FourCc, children: Vec<Box<dyn MuxBox>>) -> Self {
        Self {
            header: BoxHeader::new(tag),
            children,
        }
    }

    pub fn push(&mut self, child: impl MuxBox) {
        self.children.push(Box::new(child));
    }

    pub fn child(mut self, child: impl MuxBox) -> Self {
        self.push(child);
        self
    }
}

impl MuxNode for ContainerBox {
    fn generate(&mut self) -> Result<u64> {
        let mut payload = 0;
        for child in &mut self.children {
            payload += child.generate()?;
        }
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        self.header.write_with(out, |out| {
            for child in &self.children {
                child.write(out)?;
            }
            Ok(())
        })
    }
}

impl MuxBox for ContainerBox {
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

/// Implements [`MuxBox`] for a leaf box with a `header` field.
macro_rules! leaf_box {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::boxes::MuxBox for $ty {
            fn tag(&self) -> $crate::fourcc::FourCc {
                self.header.tag()
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    )+};
}
pub(crate) use leaf_box;

/// Generate `root` and write it, returning the bytes it produced.
pub fn serialize(root: &mut dyn MuxBox, out: &mut Compositor) -> Result<u64> {
    let size = root.generate()?;
    root.write(out)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_container_sizes_sum_children() {
        let mut moov = ContainerBox::new(FourCc::MOOV)
            .child(ContainerBox::new(FourCc::TRAK).child(ContainerBox::new(FourCc::MDIA)))
            .child(ContainerBox::new(FourCc::MVEX));
        assert_eq!(moov.generate().unwrap(), 32);
        assert_eq!(moov.generate().unwrap(), 32);

        let mut out = Compositor::new();
        moov.write(&mut out).unwrap();
        let bytes = out.take_output();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..8], &[0, 0, 0, 32, b'm', b'o', b'o', b'v']);
    }

    #[test]
    fn test_write_before_generate_fails() {
        let moov = ContainerBox::new(FourCc::MOOV);
        let mut out = Compositor::new();
        let err = moov.write(&mut out).unwrap_err();
        assert!(matches!(err, Error::Mux(MuxError::NotGenerated(FourCc::MOOV))));
        assert_eq!(out.buffered(), 0);
    }

    #[test]
    fn test_find_depth_first() {
        let moov: Box<dyn MuxBox> = Box::new(
            ContainerBox::new(FourCc::MOOV)
                .child(ContainerBox::new(FourCc::TRAK).child(ContainerBox::new(FourCc::MDIA)))
                .child(ContainerBox::new(FourCc::MVEX)),
        );
        assert_eq!(moov.find(FourCc::MDIA).map(|b| b.tag()), Some(FourCc::MDIA));
        assert!(moov.find(FourCc::MVEX).is_some());
        assert!(moov.find(FourCc::MOOF).is_none());
        assert!(moov
            .find(FourCc::TRAK)
            .and_then(|b| b.downcast_ref::<ContainerBox>())
            .is_some());
    }

    #[test]
    fn test_full_box_header_flags() {
        let mut header = BoxHeader::full(FourCc::TFHD, 1, 0x0002_0009);
        assert_eq!(header.generate(0).unwrap(), 12);
        let mut out = Compositor::new();
        header.write_with(&mut out, |_| Ok(())).unwrap();
        assert_eq!(
            out.take_output().as_ref(),
            &[0, 0, 0, 12, b't', b'f', b'h', b'd', 1, 0x02, 0x00, 0x09]
        );
    }

    #[test]
    fn test_payload_size_mismatch_is_fatal() {
        let mut header = BoxHeader::new(FourCc::MDAT);
        header.generate(4).unwrap();
        let mut out = Compositor::new();
        let err = header.write_with(&mut out, |out| out.put_u16(1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_slot_resolution() {
        let slot: Slot<u64> = Slot::new();
        let other = slot.clone();
        assert!(matches!(
            slot.resolve("base_data_offset"),
            Err(Error::Mux(MuxError::UnresolvedSlot("base_data_offset")))
        ));
        other.set(42);
        assert_eq!(slot.resolve("base_data_offset").unwrap(), 42);
    }

    #[test]
    fn test_oversized_box_rejected() {
        let mut header = BoxHeader::new(FourCc::MDAT);
        let err = header.generate(u32::MAX as u64).unwrap_err();
        assert!(matches!(err, Error::Mux(MuxError::SizeOverflow { .. })));
    }
}
