use std::cmp::min;
use std::io;

use crate::header::FileHeader;
use crate::io::{SectorDevice, SectorId};
use crate::{SectorBuf, SECTOR_SIZE};

/// An open handle on one file: a working copy of its header, the sector
/// that header came from, and a seek cursor for the stream-style calls.
///
/// Files have a fixed size, so neither write path ever grows the layout and
/// the header copy never goes stale. The handle holds no device reference;
/// every call borrows the device, which keeps the whole stack free of
/// interior mutability.
pub struct OpenFile {
    header: FileHeader,
    sector: SectorId,
    pos: usize,
}

impl OpenFile {
    /// Opens the file whose header lives at `sector`.
    pub fn open<D: SectorDevice>(dev: &mut D, sector: SectorId) -> io::Result<Self> {
        Ok(Self {
            header: FileHeader::fetch_from(dev, sector)?,
            sector,
            pos: 0,
        })
    }

    /// File length in bytes.
    pub fn length(&self) -> usize {
        self.header.num_bytes()
    }

    /// The sector holding this file's header.
    pub fn header_sector(&self) -> SectorId {
        self.sector
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Moves the seek cursor; clamped to the end of the file, the only
    /// legal past-end position.
    pub fn seek(&mut self, pos: usize) {
        self.pos = min(pos, self.length());
    }

    /// Reads from the cursor and advances it.
    pub fn read<D: SectorDevice>(&mut self, dev: &mut D, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(dev, buf, self.pos)?;
        self.pos += n;
        Ok(n)
    }

    /// Writes at the cursor and advances it.
    pub fn write<D: SectorDevice>(&mut self, dev: &mut D, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(dev, buf, self.pos)?;
        self.pos += n;
        Ok(n)
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, clamped to the
    /// file length. Returns the bytes transferred; 0 at or past the end.
    pub fn read_at<D: SectorDevice>(
        &self,
        dev: &mut D,
        buf: &mut [u8],
        offset: usize,
    ) -> io::Result<usize> {
        let length = self.length();
        if offset >= length || buf.is_empty() {
            return Ok(0);
        }
        let end = min(length, offset + buf.len());

        let mut sector_buf: SectorBuf = [0; SECTOR_SIZE];
        let mut pos = offset;
        let mut done = 0;
        while pos < end {
            let sector = self.header.byte_to_sector(dev, pos)?;
            let in_sector = pos % SECTOR_SIZE;
            let chunk = min(end - pos, SECTOR_SIZE - in_sector);

            dev.read_sector(sector, &mut sector_buf)?;
            buf[done..done + chunk].copy_from_slice(&sector_buf[in_sector..in_sector + chunk]);

            done += chunk;
            pos += chunk;
        }
        Ok(done)
    }

    /// Writes up to `buf.len()` bytes starting at `offset`, clamped to the
    /// file length; a file never grows past its creation size. Partial
    /// sectors at the edges are read back first so the surrounding bytes
    /// survive.
    pub fn write_at<D: SectorDevice>(
        &self,
        dev: &mut D,
        buf: &[u8],
        offset: usize,
    ) -> io::Result<usize> {
        let length = self.length();
        if offset >= length || buf.is_empty() {
            return Ok(0);
        }
        let end = min(length, offset + buf.len());

        let mut sector_buf: SectorBuf = [0; SECTOR_SIZE];
        let mut pos = offset;
        let mut done = 0;
        while pos < end {
            let sector = self.header.byte_to_sector(dev, pos)?;
            let in_sector = pos % SECTOR_SIZE;
            let chunk = min(end - pos, SECTOR_SIZE - in_sector);

            if chunk < SECTOR_SIZE {
                dev.read_sector(sector, &mut sector_buf)?;
            }
            sector_buf[in_sector..in_sector + chunk].copy_from_slice(&buf[done..done + chunk]);
            dev.write_sector(sector, &sector_buf)?;

            done += chunk;
            pos += chunk;
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::io::DiskEmulatorBuilder;
    use crate::{DiskEmulator, NUM_SECTORS};

    fn emulated_disk() -> DiskEmulator {
        let image = tempfile::tempfile().unwrap();
        DiskEmulatorBuilder::from(image)
            .with_sector_count(NUM_SECTORS)
            .build()
            .unwrap()
    }

    /// A leaf file of `bytes` laid out on a fresh disk, header at sector 5.
    fn leaf_file(disk: &mut DiskEmulator, bytes: usize) -> OpenFile {
        let mut map = Bitmap::new();
        for _ in 0..6 {
            map.find_and_set().unwrap();
        }
        let mut header = FileHeader::new_leaf();
        assert!(header.allocate(&mut map, bytes));
        header.write_back(disk, 5).unwrap();
        OpenFile::open(disk, 5).unwrap()
    }

    #[test]
    fn writes_read_back_across_sector_boundaries() {
        let mut disk = emulated_disk();
        let file = leaf_file(&mut disk, SECTOR_SIZE * 3);

        let data: Vec<u8> = (0..SECTOR_SIZE * 3).map(|i| (i % 251) as u8).collect();
        assert_eq!(file.write_at(&mut disk, &data, 0).unwrap(), data.len());

        let mut back = vec![0u8; data.len()];
        assert_eq!(file.read_at(&mut disk, &mut back, 0).unwrap(), data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn unaligned_writes_leave_neighbors_intact() {
        let mut disk = emulated_disk();
        let file = leaf_file(&mut disk, SECTOR_SIZE * 2);

        let base = vec![0xAAu8; SECTOR_SIZE * 2];
        file.write_at(&mut disk, &base, 0).unwrap();

        // Straddle the sector boundary.
        let patch = [0x11u8; 40];
        let offset = SECTOR_SIZE - 20;
        assert_eq!(file.write_at(&mut disk, &patch, offset).unwrap(), 40);

        let mut back = vec![0u8; SECTOR_SIZE * 2];
        file.read_at(&mut disk, &mut back, 0).unwrap();
        assert!(back[..offset].iter().all(|&b| b == 0xAA));
        assert!(back[offset..offset + 40].iter().all(|&b| b == 0x11));
        assert!(back[offset + 40..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn transfers_clamp_to_the_file_length() {
        let mut disk = emulated_disk();
        let file = leaf_file(&mut disk, 100);

        let data = [7u8; 200];
        assert_eq!(file.write_at(&mut disk, &data, 0).unwrap(), 100);
        assert_eq!(file.write_at(&mut disk, &data, 60).unwrap(), 40);

        let mut back = [0u8; 200];
        assert_eq!(file.read_at(&mut disk, &mut back, 0).unwrap(), 100);
        assert_eq!(file.read_at(&mut disk, &mut back, 100).unwrap(), 0);
    }

    #[test]
    fn the_cursor_advances_with_each_transfer() {
        let mut disk = emulated_disk();
        let mut file = leaf_file(&mut disk, 64);

        assert_eq!(file.write(&mut disk, b"hello ").unwrap(), 6);
        assert_eq!(file.write(&mut disk, b"world").unwrap(), 5);

        file.seek(0);
        let mut back = [0u8; 11];
        assert_eq!(file.read(&mut disk, &mut back).unwrap(), 11);
        assert_eq!(&back, b"hello world");
        assert_eq!(file.read(&mut disk, &mut [0u8; 64]).unwrap(), 64 - 11);
    }

    #[test]
    fn an_empty_file_transfers_nothing() {
        let mut disk = emulated_disk();
        let file = leaf_file(&mut disk, 0);

        assert_eq!(file.length(), 0);
        assert_eq!(file.write_at(&mut disk, &[1, 2, 3], 0).unwrap(), 0);
        assert_eq!(file.read_at(&mut disk, &mut [0u8; 4], 0).unwrap(), 0);
    }
}
