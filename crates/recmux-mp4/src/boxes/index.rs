//! Movie fragment random access index: `mfra` with one `tfra` per track and
//! a closing `mfro` (ISO/IEC 14496-12 8.8.9 - 8.8.11).

use super::{leaf_box, BoxHeader, ContainerBox, MuxNode, Slot};
use crate::compositor::{Compositor, Track};
use crate::error::Result;
use crate::fourcc::FourCc;

/// A fragment a reader can start decoding at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomAccessEntry {
    /// Presentation time of the first sample, in track timescale.
    pub time: u64,
    /// Absolute file offset of the fragment's `moof`.
    pub moof_offset: u64,
}

/// Track fragment random access box.
pub struct TfraBox {
    header: BoxHeader,
    pub track_id: u32,
    pub entries: Vec<RandomAccessEntry>,
}

impl TfraBox {
    /// Version 1 (64-bit time and offset) is used only when a value needs it.
    pub fn new(track_id: u32, entries: Vec<RandomAccessEntry>) -> Self {
        let wide = entries
            .iter()
            .any(|e| e.time > u32::MAX as u64 || e.moof_offset > u32::MAX as u64);
        Self {
            header: BoxHeader::full(FourCc::TFRA, u8::from(wide), 0),
            track_id,
            entries,
        }
    }

    fn entry_len(&self) -> u64 {
        // time + moof_offset + one byte each for traf, trun and sample number
        if self.header.version() == 1 {
            19
        } else {
            11
        }
    }
}

impl MuxNode for TfraBox {
    fn generate(&mut self) -> Result<u64> {
        let payload = 12 + self.entry_len() * self.entries.len() as u64;
        self.header.generate(payload)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let wide = self.header.version() == 1;
        self.header.write_with(out, |out| {
            out.put_u32(self.track_id)?;
            out.write_bits(0, 26)?; // reserved
            out.write_bits(0, 2)?; // length_size_of_traf_num
            out.write_bits(0, 2)?; // length_size_of_trun_num
            out.write_bits(0, 2)?; // length_size_of_sample_num
            out.put_u32(self.entries.len() as u32)?;
            for entry in &self.entries {
                if wide {
                    out.put_u64(entry.time)?;
                    out.put_u64(entry.moof_offset)?;
                } else {
                    out.put_u32(entry.time as u32)?;
                    out.put_u32(entry.moof_offset as u32)?;
                }
                out.put_slice(&[1, 1, 1])?;
            }
            Ok(())
        })
    }
}

/// Movie fragment random access offset box: the size of the enclosing
/// `mfra`, so readers can find it from the end of the file.
pub struct MfroBox {
    header: BoxHeader,
    pub mfra_size: Slot<u32>,
}

impl MfroBox {
    pub fn new() -> Self {
        Self {
            header: BoxHeader::full(FourCc::MFRO, 0, 0),
            mfra_size: Slot::new(),
        }
    }
}

impl Default for MfroBox {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxNode for MfroBox {
    fn generate(&mut self) -> Result<u64> {
        self.header.generate(4)
    }

    fn write(&self, out: &mut Compositor) -> Result<()> {
        let size = self.mfra_size.resolve("mfra_size")?;
        self.header.write_with(out, |out| out.put_u32(size))
    }
}

leaf_box!(TfraBox, MfroBox);

/// The complete `mfra` box for every registered track.
pub struct RandomAccessIndex {
    pub mfra: ContainerBox,
    mfra_size: Slot<u32>,
}

impl RandomAccessIndex {
    pub fn new(tracks: &[Track]) -> Self {
        let mfro = MfroBox::new();
        let mfra_size = mfro.mfra_size.clone();
        let mut mfra = ContainerBox::new(FourCc::MFRA);
        for track in tracks {
            mfra.push(TfraBox::new(track.id, track.random_access.clone()));
        }
        mfra.push(mfro);
        Self { mfra, mfra_size }
    }

    /// Size the index, bind the `mfro` size and write it. Returns the size.
    pub fn write(mut self, out: &mut Compositor) -> Result<u64> {
        let size = self.mfra.generate()?;
        // generate() already rejected sizes beyond u32
        self.mfra_size.set(size as u32);
        self.mfra.write(out)?;
        Ok(size)
    }
}
