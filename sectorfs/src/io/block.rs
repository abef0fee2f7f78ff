use std::path::Path;

/// The sector number to access, ranging from 0 (the first sector) to n - 1
/// (the last sector) where n is the number of sectors on the device.
pub type SectorId = usize;

/// A fixed-geometry, synchronous sector store. Every call transfers exactly
/// one sector and returns only once the device has completed it.
///
/// The filesystem layers above assume nothing about the medium beyond this
/// interface, so a real driver and the file-backed [`super::DiskEmulator`]
/// are interchangeable.
pub trait SectorDevice {
    /// Opens a device image at the specified path. This method does not
    /// validate the image contents; callers must ensure the image was
    /// appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nsectors: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;

    /// Reads one sector into the provided buffer.
    ///
    /// # Errors
    ///
    /// Reading a sector out of range returns an error, as does a buffer
    /// smaller than one sector.
    fn read_sector(&mut self, sector: SectorId, buf: &mut [u8]) -> std::io::Result<()>;

    /// Writes the buffer into the specified sector, truncating anything
    /// beyond one sector's worth of bytes.
    ///
    /// # Errors
    ///
    /// Writing a sector out of range returns an error.
    fn write_sector(&mut self, sector: SectorId, buf: &[u8]) -> std::io::Result<()>;

    /// Flushes any buffered I/O to the underlying medium.
    fn sync(&mut self) -> std::io::Result<()>;
}
