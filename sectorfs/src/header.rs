use std::fmt::{self, Debug, Formatter};
use std::io;
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes};

use crate::alloc::Bitmap;
use crate::io::{SectorDevice, SectorId};
use crate::{SectorBuf, NUM_DIRECT, SECTOR_SIZE};

/// Bytes addressable through one level-1 header.
pub const LEVEL1_CAPACITY: usize = NUM_DIRECT * SECTOR_SIZE;

/// Bytes addressable through a level-0 root and its children.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT * LEVEL1_CAPACITY;

const LEVEL_ROOT: u32 = 0;
const LEVEL_LEAF: u32 = 1;

/// One sector's worth of file metadata.
///
/// A `level == 1` header lists the data sectors of up to
/// [`LEVEL1_CAPACITY`] bytes. A `level == 0` header is the root of a larger
/// file: its entries are the sectors of level-1 headers, one per
/// [`LEVEL1_CAPACITY`]-byte slice of the file. The bitmap and directory
/// files written at format time are bare level-1 headers, so readers handle
/// both shapes.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy)]
pub struct FileHeader {
    /// File length in bytes. On a level-1 child of a larger file this is the
    /// length of that child's slice.
    num_bytes: u32,
    /// Populated entries in `data_sectors`.
    num_sectors: u32,
    /// 0 for an index root, 1 for a leaf over data sectors.
    level: u32,
    data_sectors: [u32; NUM_DIRECT],
}

const _: () = assert!(size_of::<FileHeader>() == SECTOR_SIZE);

impl FileHeader {
    /// An empty leaf header; fill it with [`FileHeader::allocate`].
    pub fn new_leaf() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            level: LEVEL_LEAF,
            data_sectors: [0; NUM_DIRECT],
        }
    }

    /// An index root over the given child-header sectors.
    pub fn new_root(size: usize, children: &[SectorId]) -> Self {
        assert!(children.len() <= NUM_DIRECT);
        let mut data_sectors = [0u32; NUM_DIRECT];
        for (slot, &sector) in data_sectors.iter_mut().zip(children) {
            *slot = sector as u32;
        }
        Self {
            num_bytes: size as u32,
            num_sectors: children.len() as u32,
            level: LEVEL_ROOT,
            data_sectors,
        }
    }

    /// Grabs data sectors for a `bytes`-long leaf from the free map.
    ///
    /// Returns false when the file does not fit one leaf or the map runs
    /// dry; the header is unusable then and the caller abandons the map by
    /// never writing it back.
    pub fn allocate(&mut self, free_map: &mut Bitmap, bytes: usize) -> bool {
        debug_assert_eq!(self.level, LEVEL_LEAF);
        let sectors = bytes.div_ceil(SECTOR_SIZE);
        if sectors > NUM_DIRECT {
            return false;
        }
        for slot in 0..sectors {
            match free_map.find_and_set() {
                Some(sector) => self.data_sectors[slot] = sector as u32,
                None => return false,
            }
        }
        self.num_bytes = bytes as u32;
        self.num_sectors = sectors as u32;
        true
    }

    /// Releases every sector this header lists. The header's own sector is
    /// owned by the caller and stays marked.
    pub fn deallocate(&self, free_map: &mut Bitmap) {
        for &sector in self.data_sectors() {
            free_map.clear(sector as usize);
        }
    }

    pub fn fetch_from<D: SectorDevice>(dev: &mut D, sector: SectorId) -> io::Result<Self> {
        let mut buf: SectorBuf = [0; SECTOR_SIZE];
        dev.read_sector(sector, &mut buf)?;
        Ok(Self::read_from(&buf[..]).expect("header layout fills a sector exactly"))
    }

    pub fn write_back<D: SectorDevice>(&self, dev: &mut D, sector: SectorId) -> io::Result<()> {
        dev.write_sector(sector, self.as_bytes())
    }

    /// Translates a byte offset within the file to the data sector holding
    /// it, chasing one level of indirection for a root header.
    pub fn byte_to_sector<D: SectorDevice>(
        &self,
        dev: &mut D,
        offset: usize,
    ) -> io::Result<SectorId> {
        if self.level == LEVEL_LEAF {
            return Ok(self.data_sectors[offset / SECTOR_SIZE] as SectorId);
        }
        let child = self.data_sectors[offset / LEVEL1_CAPACITY] as SectorId;
        let leaf = Self::fetch_from(dev, child)?;
        leaf.byte_to_sector(dev, offset % LEVEL1_CAPACITY)
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bytes as usize
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors as usize
    }

    pub fn is_root(&self) -> bool {
        self.level == LEVEL_ROOT
    }

    /// The populated sector entries: data sectors for a leaf, child-header
    /// sectors for a root.
    pub fn data_sectors(&self) -> &[u32] {
        &self.data_sectors[..self.num_sectors as usize]
    }
}

impl Debug for FileHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader")
            .field("num_bytes", &self.num_bytes)
            .field("num_sectors", &self.num_sectors)
            .field("level", &self.level)
            .field("data_sectors", &self.data_sectors())
            .finish()
    }
}
