use std::io;
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes};

use crate::file::OpenFile;
use crate::io::SectorDevice;
use crate::{FREE_MAP_FILE_SIZE, NUM_SECTORS};

/// Free-sector map. Bit i set means sector i is allocated.
///
/// The map itself persists as a regular file whose header sits at sector 0;
/// an operation works on an in-memory copy and publishes it with
/// [`Bitmap::write_back`] only once the whole operation has succeeded.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy, PartialEq, Eq)]
pub struct Bitmap {
    bits: [u8; NUM_SECTORS / 8],
}

const _: () = assert!(size_of::<Bitmap>() == FREE_MAP_FILE_SIZE);

impl Bitmap {
    /// A map with every sector free.
    pub fn new() -> Self {
        Self {
            bits: [0; NUM_SECTORS / 8],
        }
    }

    /// Reads the serialized map out of its file.
    pub fn fetch_from<D: SectorDevice>(dev: &mut D, file: &OpenFile) -> io::Result<Self> {
        let mut buf = [0u8; FREE_MAP_FILE_SIZE];
        file.read_at(dev, &mut buf, 0)?;
        Ok(Self::read_from(&buf[..]).expect("bitmap file matches the serialized layout"))
    }

    /// Flushes the serialized map into its file.
    pub fn write_back<D: SectorDevice>(&self, dev: &mut D, file: &OpenFile) -> io::Result<()> {
        file.write_at(dev, self.as_bytes(), 0)?;
        Ok(())
    }

    pub fn mark(&mut self, sector: usize) {
        assert!(sector < NUM_SECTORS);
        self.bits[sector / 8] |= 1 << (sector % 8);
    }

    pub fn clear(&mut self, sector: usize) {
        assert!(sector < NUM_SECTORS);
        self.bits[sector / 8] &= !(1 << (sector % 8));
    }

    pub fn test(&self, sector: usize) -> bool {
        assert!(sector < NUM_SECTORS);
        self.bits[sector / 8] >> (sector % 8) & 1 == 1
    }

    /// Finds the lowest clear bit, sets it, and returns its index. The scan
    /// is deterministic: repeated calls hand out strictly increasing sectors
    /// until something is cleared in between.
    pub fn find_and_set(&mut self) -> Option<usize> {
        let (word, free) = self
            .bits
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u8::MAX)
            .map(|(idx, word)| (idx, word.trailing_ones() as usize))?;

        let sector = word * 8 + free;
        if sector >= NUM_SECTORS {
            return None;
        }
        self.bits[word] |= 1 << free;
        Some(sector)
    }

    /// How many sectors are still free.
    pub fn count_clear(&self) -> usize {
        self.bits.iter().map(|word| word.count_zeros() as usize).sum()
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}
