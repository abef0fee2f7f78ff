use std::io::{self, Write};
use std::mem::size_of;
use std::str;

use zerocopy::{AsBytes, FromBytes};

use crate::file::OpenFile;
use crate::io::{SectorDevice, SectorId};
use crate::{DIRECTORY_FILE_SIZE, FILE_NAME_MAX, NUM_DIR_ENTRIES};

const KIND_FILE: u8 = 0;
const KIND_DIR: u8 = 1;

/// One slot of a directory table: a name bound to the sector holding the
/// entry's file header, plus a flag for whether that header is itself a
/// directory. Slots are reused in place; `in_use` is the liveness signal.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy)]
pub struct DirectoryEntry {
    in_use: u8,
    kind: u8,
    /// NUL-padded; the last byte stays NUL so `name()` always terminates.
    name: [u8; FILE_NAME_MAX + 1],
    sector: u32,
}

const _: () = assert!(size_of::<DirectoryEntry>() == 16);

impl DirectoryEntry {
    fn empty() -> Self {
        Self {
            in_use: 0,
            kind: KIND_FILE,
            name: [0; FILE_NAME_MAX + 1],
            sector: 0,
        }
    }

    fn new(name: &str, sector: SectorId, kind: u8) -> Self {
        let trimmed = truncate_name(name);
        let mut bytes = [0u8; FILE_NAME_MAX + 1];
        bytes[..trimmed.len()].copy_from_slice(trimmed.as_bytes());
        Self {
            in_use: 1,
            kind,
            name: bytes,
            sector: sector as u32,
        }
    }

    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn is_dir(&self) -> bool {
        self.kind == KIND_DIR
    }

    pub fn sector(&self) -> SectorId {
        self.sector as SectorId
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(0);
        str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// Names longer than the on-disk field are cut without error; stay on a
/// char boundary so the stored prefix remains valid UTF-8.
fn truncate_name(name: &str) -> &str {
    if name.len() <= FILE_NAME_MAX {
        return name;
    }
    let mut end = FILE_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// A fixed table of name→sector bindings, serialized whole as the contents
/// of a directory file. Insertion takes the first free slot; lookup is a
/// linear scan.
#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy)]
pub struct Directory {
    table: [DirectoryEntry; NUM_DIR_ENTRIES],
}

const _: () = assert!(size_of::<Directory>() == DIRECTORY_FILE_SIZE);

impl Directory {
    pub fn new() -> Self {
        Self {
            table: [DirectoryEntry::empty(); NUM_DIR_ENTRIES],
        }
    }

    /// Reads the whole table out of its directory file.
    pub fn fetch_from<D: SectorDevice>(dev: &mut D, file: &OpenFile) -> io::Result<Self> {
        let mut buf = [0u8; DIRECTORY_FILE_SIZE];
        file.read_at(dev, &mut buf, 0)?;
        Ok(Self::read_from(&buf[..]).expect("directory file matches the serialized layout"))
    }

    /// Flushes the whole table into its directory file.
    pub fn write_back<D: SectorDevice>(&self, dev: &mut D, file: &OpenFile) -> io::Result<()> {
        file.write_at(dev, self.as_bytes(), 0)?;
        Ok(())
    }

    /// The header sector bound to `name`, if present.
    pub fn find(&self, name: &str) -> Option<SectorId> {
        self.find_index(name).map(|idx| self.table[idx].sector())
    }

    /// The slot index bound to `name`, if present.
    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.in_use() && entry.name() == name)
    }

    pub fn entry(&self, index: usize) -> &DirectoryEntry {
        &self.table[index]
    }

    /// Binds `name` to a file header sector. False when the name is taken
    /// or the table is full.
    pub fn add(&mut self, name: &str, sector: SectorId) -> bool {
        self.insert(name, sector, KIND_FILE)
    }

    /// Binds `name` to a directory header sector.
    pub fn add_dir(&mut self, name: &str, sector: SectorId) -> bool {
        self.insert(name, sector, KIND_DIR)
    }

    fn insert(&mut self, name: &str, sector: SectorId, kind: u8) -> bool {
        if self.find(name).is_some() {
            return false;
        }
        match self.table.iter_mut().find(|entry| !entry.in_use()) {
            Some(slot) => {
                *slot = DirectoryEntry::new(name, sector, kind);
                true
            }
            None => false,
        }
    }

    /// Clears the slot bound to `name`. False when no such entry exists.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.find_index(name) {
            Some(idx) => {
                self.table[idx].in_use = 0;
                true
            }
            None => false,
        }
    }

    /// The in-use entries, in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.table.iter().filter(|entry| entry.in_use())
    }

    /// Writes the name of every in-use entry, one per line.
    pub fn list<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for entry in self.entries() {
            writeln!(out, "{}", entry.name())?;
        }
        Ok(())
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
