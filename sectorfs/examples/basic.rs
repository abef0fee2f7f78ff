use std::io::stdout;

use sectorfs::{DiskEmulatorBuilder, FileSystem, NUM_SECTORS};

pub fn main() {
    let image = tempfile::tempfile().unwrap();
    let dev = DiskEmulatorBuilder::from(image)
        .with_sector_count(NUM_SECTORS)
        .build()
        .expect("could not initialize the disk emulator");

    // Format a fresh disk and populate a small tree.
    let mut fs = FileSystem::format(dev).expect("format failed");
    fs.create_dir("docs", "/").unwrap();
    fs.create("/docs/notes", 64).unwrap();
    fs.create("/hello", 32).unwrap();

    let fd = fs.open_fd("/hello").unwrap();
    fs.write_fd(b"hello from a tiny disk image!", fd).unwrap();
    fs.close_fd(fd);

    fs.recursive_list("/", &mut stdout()).unwrap();
}
