use std::array;
use std::io::{self, Write};

use log::{debug, warn};
use thiserror::Error;

use crate::alloc::Bitmap;
use crate::dir::Directory;
use crate::file::OpenFile;
use crate::header::{FileHeader, LEVEL1_CAPACITY, MAX_FILE_SIZE};
use crate::io::SectorDevice;
use crate::{
    DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, FD_TABLE_SIZE, FREE_MAP_FILE_SIZE, FREE_MAP_SECTOR,
};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("name already present in directory")]
    AlreadyExists,
    #[error("directory table is full")]
    DirectoryFull,
    #[error("no free sectors left")]
    NoSpace,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid file descriptor")]
    InvalidDescriptor,
    #[error("device i/o failed")]
    Io(#[from] io::Error),
}

/// The filesystem facade: maps slash-delimited paths to files and nested
/// directories on a [`SectorDevice`].
///
/// The free map and the root directory are regular files whose headers live
/// at fixed sectors; both handles stay open for the instance's lifetime.
/// Mutating operations work on in-memory copies of the map and the affected
/// directory table and flush them only once the whole operation has
/// succeeded, so any failure leaves the on-disk metadata untouched.
pub struct FileSystem<D: SectorDevice> {
    dev: D,
    free_map_file: OpenFile,
    directory_file: OpenFile,
    fd_table: [Option<OpenFile>; FD_TABLE_SIZE],
}

impl<D: SectorDevice> FileSystem<D> {
    /// Initializes an empty filesystem onto the device: a free map with the
    /// two well-known header sectors marked, a leaf header for each of the
    /// two metadata files, and an empty root directory table.
    pub fn format(mut dev: D) -> Result<Self, FsError> {
        debug!("formatting the file system");

        let mut free_map = Bitmap::new();
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(DIRECTORY_SECTOR);

        let mut map_header = FileHeader::new_leaf();
        let mut dir_header = FileHeader::new_leaf();
        if !map_header.allocate(&mut free_map, FREE_MAP_FILE_SIZE)
            || !dir_header.allocate(&mut free_map, DIRECTORY_FILE_SIZE)
        {
            return Err(FsError::NoSpace);
        }

        // The headers must be on disk before the files can be opened; open
        // reads them back from their fixed sectors.
        map_header.write_back(&mut dev, FREE_MAP_SECTOR)?;
        dir_header.write_back(&mut dev, DIRECTORY_SECTOR)?;

        let free_map_file = OpenFile::open(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::open(&mut dev, DIRECTORY_SECTOR)?;

        free_map.write_back(&mut dev, &free_map_file)?;
        Directory::new().write_back(&mut dev, &directory_file)?;

        Ok(Self {
            dev,
            free_map_file,
            directory_file,
            fd_table: array::from_fn(|_| None),
        })
    }

    /// Opens an already-formatted device.
    pub fn mount(mut dev: D) -> Result<Self, FsError> {
        let free_map_file = OpenFile::open(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::open(&mut dev, DIRECTORY_SECTOR)?;
        Ok(Self {
            dev,
            free_map_file,
            directory_file,
            fd_table: array::from_fn(|_| None),
        })
    }

    /// Creates a file of a fixed size. The layout is always a level-0 root
    /// over `ceil(size / LEVEL1_CAPACITY)` leaf headers, each covering its
    /// slice of the file; the first leaves take a full slice, the last takes
    /// the remainder.
    pub fn create(&mut self, path: &str, size: usize) -> Result<(), FsError> {
        debug!("creating file {path} with size {size}");

        let (parent, name) = split_path(path);
        let dir_file = self.open_dir(parent)?;
        let mut directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        if size > MAX_FILE_SIZE {
            return Err(FsError::NoSpace);
        }

        let mut free_map = Bitmap::fetch_from(&mut self.dev, &self.free_map_file)?;

        let root_sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        let leaf_count = size.div_ceil(LEVEL1_CAPACITY);
        let mut leaf_sectors = Vec::with_capacity(leaf_count);
        for _ in 0..leaf_count {
            leaf_sectors.push(free_map.find_and_set().ok_or(FsError::NoSpace)?);
        }

        if !directory.add(name, root_sector) {
            return Err(FsError::DirectoryFull);
        }

        let root = FileHeader::new_root(size, &leaf_sectors);
        let mut leaves = Vec::with_capacity(leaf_count);
        let mut remaining = size;
        for _ in 0..leaf_count {
            let share = remaining.min(LEVEL1_CAPACITY);
            let mut leaf = FileHeader::new_leaf();
            if !leaf.allocate(&mut free_map, share) {
                return Err(FsError::NoSpace);
            }
            remaining -= share;
            leaves.push(leaf);
        }

        // Everything worked; only now does anything reach the disk.
        root.write_back(&mut self.dev, root_sector)?;
        for (leaf, &sector) in leaves.iter().zip(&leaf_sectors) {
            leaf.write_back(&mut self.dev, sector)?;
        }
        directory.write_back(&mut self.dev, &dir_file)?;
        free_map.write_back(&mut self.dev, &self.free_map_file)?;
        Ok(())
    }

    /// Creates an empty directory named `name` under the directory `parent`.
    pub fn create_dir(&mut self, name: &str, parent: &str) -> Result<(), FsError> {
        debug!("creating directory {name} under {parent}");

        let dir_file = self.open_dir(parent)?;
        let mut directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut free_map = Bitmap::fetch_from(&mut self.dev, &self.free_map_file)?;
        let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        if !directory.add_dir(name, sector) {
            return Err(FsError::DirectoryFull);
        }

        let mut header = FileHeader::new_leaf();
        if !header.allocate(&mut free_map, DIRECTORY_FILE_SIZE) {
            return Err(FsError::NoSpace);
        }

        header.write_back(&mut self.dev, sector)?;
        directory.write_back(&mut self.dev, &dir_file)?;
        free_map.write_back(&mut self.dev, &self.free_map_file)?;

        let new_dir_file = OpenFile::open(&mut self.dev, sector)?;
        Directory::new().write_back(&mut self.dev, &new_dir_file)?;
        Ok(())
    }

    /// Opens the file at `path` for byte-level reads and writes.
    pub fn open(&mut self, path: &str) -> Result<OpenFile, FsError> {
        debug!("opening file {path}");

        let (parent, name) = split_path(path);
        let dir_file = self.open_dir(parent)?;
        let directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        Ok(OpenFile::open(&mut self.dev, sector)?)
    }

    /// Removes the file or directory at `path`, releasing every sector it
    /// transitively owns. A non-empty directory is only removed when
    /// `recursive` is set; its children go first, depth-first.
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<(), FsError> {
        debug!("removing {path}");

        let (parent, name) = split_path(path);
        let dir_file = match self.open_dir(parent) {
            Ok(file) => file,
            Err(err) => {
                warn!("directory {parent} not found");
                return Err(err);
            }
        };
        let mut directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        let Some(index) = directory.find_index(name) else {
            warn!("file {name} not found");
            return Err(FsError::NotFound);
        };
        let entry = *directory.entry(index);
        let sector = entry.sector();
        let header = FileHeader::fetch_from(&mut self.dev, sector)?;

        if entry.is_dir() {
            let target_file = self.open_dir(path)?;
            let target = Directory::fetch_from(&mut self.dev, &target_file)?;
            let children: Vec<String> = target
                .entries()
                .map(|child| child.name().to_owned())
                .collect();
            if !recursive && !children.is_empty() {
                warn!("{name}: directory not empty");
                return Err(FsError::NotEmpty);
            }
            for child in children {
                self.remove(&join_path(path, &child), recursive)?;
            }
        }

        // Fetched after the recursion so the children's frees are already
        // on disk and visible in this working copy.
        let mut free_map = Bitmap::fetch_from(&mut self.dev, &self.free_map_file)?;
        if header.is_root() {
            for &leaf_sector in header.data_sectors() {
                let leaf = FileHeader::fetch_from(&mut self.dev, leaf_sector as usize)?;
                leaf.deallocate(&mut free_map);
                // The leaf header sectors themselves are listed by the root
                // and come back in its deallocate below.
            }
        }
        header.deallocate(&mut free_map);
        free_map.clear(sector);
        directory.remove(name);

        free_map.write_back(&mut self.dev, &self.free_map_file)?;
        directory.write_back(&mut self.dev, &dir_file)?;
        Ok(())
    }

    /// Writes the names in the directory at `path`, one per line.
    pub fn list<W: Write>(&mut self, path: &str, out: &mut W) -> Result<(), FsError> {
        let dir_file = self.open_dir(path)?;
        let directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        directory.list(out)?;
        Ok(())
    }

    /// Renders the subtree under `path` as a box-drawing tree: `├──` for a
    /// child with siblings after it, `└──` for the last one, continuation
    /// columns for the ancestors, directory names in bright blue with a
    /// trailing slash.
    pub fn recursive_list<W: Write>(&mut self, path: &str, out: &mut W) -> Result<(), FsError> {
        let mut ancestors_last = Vec::new();
        self.render_tree(path, &mut ancestors_last, out)
    }

    fn render_tree<W: Write>(
        &mut self,
        path: &str,
        ancestors_last: &mut Vec<bool>,
        out: &mut W,
    ) -> Result<(), FsError> {
        let dir_file = self.open_dir(path)?;
        let directory = Directory::fetch_from(&mut self.dev, &dir_file)?;

        let entries: Vec<_> = directory.entries().copied().collect();
        let mut remaining = entries.len();
        for entry in entries {
            remaining -= 1;
            for &done in ancestors_last.iter() {
                out.write_all(if done { "    " } else { "│   " }.as_bytes())?;
            }
            out.write_all(if remaining > 0 { "├──" } else { "└──" }.as_bytes())?;
            if entry.is_dir() {
                write!(out, "\x1B[1;34m{}/", entry.name())?;
            } else {
                write!(out, "{}", entry.name())?;
            }
            out.write_all(b"\x1B[0m\n")?;

            if entry.is_dir() {
                ancestors_last.push(remaining == 0);
                self.render_tree(&join_path(path, entry.name()), ancestors_last, out)?;
                ancestors_last.pop();
            }
        }
        Ok(())
    }

    /// Opens `path` and parks the handle in the lowest free descriptor
    /// slot, returning its id. Slot 0 is reserved. `None` when the open
    /// fails or the table is full.
    pub fn open_fd(&mut self, path: &str) -> Option<usize> {
        let file = self.open(path).ok()?;
        let id = (1..FD_TABLE_SIZE).find(|&id| self.fd_table[id].is_none())?;
        self.fd_table[id] = Some(file);
        Some(id)
    }

    /// Reads through a descriptor, advancing its cursor.
    pub fn read_fd(&mut self, buf: &mut [u8], id: usize) -> Result<usize, FsError> {
        let file = self
            .fd_table
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidDescriptor)?;
        Ok(file.read(&mut self.dev, buf)?)
    }

    /// Writes through a descriptor, advancing its cursor.
    pub fn write_fd(&mut self, buf: &[u8], id: usize) -> Result<usize, FsError> {
        let file = self
            .fd_table
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidDescriptor)?;
        Ok(file.write(&mut self.dev, buf)?)
    }

    /// Releases a descriptor. False when the slot was already empty, so a
    /// double close is a harmless no-op.
    pub fn close_fd(&mut self, id: usize) -> bool {
        self.fd_table
            .get_mut(id)
            .and_then(|slot| slot.take())
            .is_some()
    }

    /// A fresh working copy of the on-disk free map, for diagnostics and
    /// space checks.
    pub fn free_map(&mut self) -> Result<Bitmap, FsError> {
        Ok(Bitmap::fetch_from(&mut self.dev, &self.free_map_file)?)
    }

    /// Dumps the metadata files: both well-known headers, the allocated
    /// sectors, and the root directory table.
    pub fn print<W: Write>(&mut self, out: &mut W) -> Result<(), FsError> {
        let map_header = FileHeader::fetch_from(&mut self.dev, FREE_MAP_SECTOR)?;
        let dir_header = FileHeader::fetch_from(&mut self.dev, DIRECTORY_SECTOR)?;
        writeln!(out, "free map header: {map_header:?}")?;
        writeln!(out, "directory header: {dir_header:?}")?;

        let free_map = self.free_map()?;
        write!(out, "allocated sectors:")?;
        for sector in (0..crate::NUM_SECTORS).filter(|&s| free_map.test(s)) {
            write!(out, " {sector}")?;
        }
        writeln!(out)?;

        let directory = Directory::fetch_from(&mut self.dev, &self.directory_file)?;
        writeln!(out, "root directory:")?;
        for entry in directory.entries() {
            writeln!(
                out,
                "  {}{} -> sector {}",
                entry.name(),
                if entry.is_dir() { "/" } else { "" },
                entry.sector()
            )?;
        }
        Ok(())
    }

    /// The underlying device, e.g. to sync an emulator image.
    pub fn device(&mut self) -> &mut D {
        &mut self.dev
    }

    /// Walks the slash-delimited `path` from the root directory and opens
    /// the final component's directory file. Intermediate components are
    /// not checked to actually be directories; callers pass directory
    /// paths.
    fn open_dir(&mut self, path: &str) -> Result<OpenFile, FsError> {
        let mut directory = Directory::fetch_from(&mut self.dev, &self.directory_file)?;
        let mut sector = DIRECTORY_SECTOR;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            sector = directory.find(component).ok_or(FsError::NotFound)?;
            let dir_file = OpenFile::open(&mut self.dev, sector)?;
            directory = Directory::fetch_from(&mut self.dev, &dir_file)?;
        }
        Ok(OpenFile::open(&mut self.dev, sector)?)
    }
}

/// Splits a full path at its last slash into (parent, name); a path with no
/// parent resolves against the root.
fn split_path(full: &str) -> (&str, &str) {
    match full.rfind('/') {
        Some(idx) => {
            let parent = &full[..idx];
            (if parent.is_empty() { "/" } else { parent }, &full[idx + 1..])
        }
        None => ("/", full),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}
