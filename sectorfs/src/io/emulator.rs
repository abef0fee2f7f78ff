use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

use crate::io::block::{SectorDevice, SectorId};
use crate::SECTOR_SIZE;

/// Emulates sector-granular disk storage in userspace using a file as the
/// backing medium. This is only meant to be used for filesystem development
/// and testing.
pub struct DiskEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of
    /// a sector.
    fd: File,
    /// The total number of sectors available on the emulated device.
    nsectors: usize,
}

impl DiskEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }
}

impl SectorDevice for DiskEmulator {
    fn open_disk<P: AsRef<Path>>(path: P, nsectors: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return an error if the image does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(DiskEmulator { fd: file, nsectors })
    }

    fn read_sector(&mut self, sector: SectorId, buf: &mut [u8]) -> std::io::Result<()> {
        if sector >= self.nsectors {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }
        if buf.len() < SECTOR_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read a sector",
            ));
        }
        self.fd.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        self.fd.read_exact(&mut buf[..SECTOR_SIZE])?;
        Ok(())
    }

    fn write_sector(&mut self, sector: SectorId, buf: &[u8]) -> std::io::Result<()> {
        if sector >= self.nsectors {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }
        self.fd.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;

        let max = SECTOR_SIZE.min(buf.len());
        self.fd.write_all(&buf[..max])?;
        Ok(())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct DiskEmulatorBuilder {
    fd: File,
    nsectors: usize,
}

impl From<File> for DiskEmulatorBuilder {
    fn from(fd: File) -> Self {
        DiskEmulatorBuilder { fd, nsectors: 0 }
    }
}

impl DiskEmulatorBuilder {
    /// Sets the number of sectors on the emulated device.
    pub fn with_sector_count(mut self, nsectors: usize) -> Self {
        self.nsectors = nsectors;
        self
    }

    /// Zero-fills the backing file and hands it to the emulator. The builder
    /// takes ownership of the file descriptor, so it can only produce one
    /// emulator.
    pub fn build(mut self) -> std::io::Result<DiskEmulator> {
        debug_assert!(self.nsectors > 0);
        self.zero_sectors()?;
        Ok(DiskEmulator {
            fd: self.fd,
            nsectors: self.nsectors,
        })
    }

    fn zero_sectors(&mut self) -> std::io::Result<()> {
        let mut bfd = BufWriter::new(&self.fd);
        for _ in 0..self.nsectors {
            bfd.write_all(&[0u8; SECTOR_SIZE])?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(nsectors: usize) -> DiskEmulator {
        let image = tempfile::tempfile().unwrap();
        DiskEmulatorBuilder::from(image)
            .with_sector_count(nsectors)
            .build()
            .expect("failed to allocate backing file")
    }

    #[test]
    fn backing_file_holds_exactly_the_device() {
        let mut disk = emulator(4);
        disk.sync().unwrap();
        assert_eq!(
            disk.into_file().metadata().unwrap().len(),
            (4 * SECTOR_SIZE) as u64
        );
    }

    #[test]
    fn sectors_round_trip_independently() {
        let mut disk = emulator(4);

        let sector = [0x55u8; SECTOR_SIZE];
        disk.write_sector(2, &sector).unwrap();
        disk.sync().unwrap();

        let mut untouched = [0u8; SECTOR_SIZE];
        disk.read_sector(3, &mut untouched).unwrap();
        assert_eq!(untouched, [0u8; SECTOR_SIZE]);

        let mut filled = [0u8; SECTOR_SIZE];
        disk.read_sector(2, &mut filled).unwrap();
        assert_eq!(filled, [0x55u8; SECTOR_SIZE]);
    }

    #[test]
    fn first_and_last_sectors_are_addressable() {
        let mut disk = emulator(2);

        disk.write_sector(0, &[0x11u8; SECTOR_SIZE]).unwrap();
        disk.write_sector(1, &[0x22u8; SECTOR_SIZE]).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(0, &mut buf).unwrap();
        assert_eq!(buf, [0x11u8; SECTOR_SIZE]);
        disk.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf, [0x22u8; SECTOR_SIZE]);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut disk = emulator(1);

        let mut buf = [0u8; SECTOR_SIZE];
        assert!(disk.read_sector(1, &mut buf).is_err());
        assert!(disk.write_sector(1, &buf).is_err());
    }

    #[test]
    fn short_buffer_read_is_rejected() {
        let mut disk = emulator(1);

        let mut short = [0u8; SECTOR_SIZE / 2];
        assert!(disk.read_sector(0, &mut short).is_err());
    }
}
