mod alloc;
mod dir;
mod file;
mod fs;
mod header;
mod io;

pub use crate::alloc::Bitmap;
pub use crate::dir::{Directory, DirectoryEntry};
pub use crate::file::OpenFile;
pub use crate::fs::{FileSystem, FsError};
pub use crate::header::{FileHeader, LEVEL1_CAPACITY, MAX_FILE_SIZE};
pub use crate::io::{DiskEmulator, DiskEmulatorBuilder, SectorDevice, SectorId};

use std::mem::size_of;

/// Bytes per disk sector.
pub const SECTOR_SIZE: usize = 128;

/// Sectors on the device.
pub const NUM_SECTORS: usize = 128;

/// Sector index entries that fit in a file header next to its three
/// bookkeeping words.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 3 * size_of::<u32>()) / size_of::<u32>();

/// Slots in a directory table.
pub const NUM_DIR_ENTRIES: usize = 64;

/// Longest file name stored in a directory entry; longer names are truncated.
pub const FILE_NAME_MAX: usize = 9;

/// Slots in the descriptor table. Descriptor 0 is reserved.
pub const FD_TABLE_SIZE: usize = 20;

/// Sector holding the free-map file header.
pub const FREE_MAP_SECTOR: SectorId = 0;

/// Sector holding the root directory file header.
pub const DIRECTORY_SECTOR: SectorId = 1;

/// Serialized size of the free-sector bitmap.
pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / 8;

/// Serialized size of a directory table.
pub const DIRECTORY_FILE_SIZE: usize = NUM_DIR_ENTRIES * size_of::<DirectoryEntry>();

type SectorBuf = [u8; SECTOR_SIZE];
