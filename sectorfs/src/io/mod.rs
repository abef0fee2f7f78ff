mod block;
mod emulator;

pub use block::{SectorDevice, SectorId};
pub use emulator::{DiskEmulator, DiskEmulatorBuilder};
