mod common;

use std::collections::HashSet;

use common::{create, pattern, write_file, Fixture};
use fatfs_vfs::config::MAX_FAT_FILES;
use fatfs_vfs::fs::vfs::{Fcntl, OpenFlags, SeekWhence};
use fatfs_vfs::{Errno, Fd};

#[test]
fn test_descriptors_unique_up_to_capacity() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/A.TXT", b"abc");

    let mut fds = Vec::new();
    for _ in 0..MAX_FAT_FILES {
        fds.push(h.open("/A.TXT", OpenFlags::RDONLY).unwrap());
    }
    let unique: HashSet<u32> = fds.iter().map(|fd| fd.raw()).collect();
    assert_eq!(unique.len(), MAX_FAT_FILES);
    assert!(!unique.contains(&0));
    assert_eq!(fx.fs.open_handles(), MAX_FAT_FILES);

    assert_eq!(h.open("/A.TXT", OpenFlags::RDONLY), Err(Errno::ENFILE));
    assert_eq!(fx.fs.errno(), Errno::ENFILE);

    // Existing handles are untouched by the failed open
    let mut buf = [0u8; 3];
    assert_eq!(h.read(fds[0], &mut buf).unwrap(), 3);
    assert_eq!(&buf, b"abc");

    h.close(fds[5]).unwrap();
    let again = h.open("/A.TXT", OpenFlags::RDONLY).unwrap();
    assert_eq!(again, fds[5]);

    for fd in fds {
        h.close(fd).unwrap();
    }
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_bad_descriptors() {
    let fx = Fixture::new();
    let h = fx.sd();
    let mut buf = [0u8; 4];

    assert_eq!(h.read(Fd::from_raw(0), &mut buf), Err(Errno::ENFILE));
    assert_eq!(h.read(Fd::from_raw(MAX_FAT_FILES as u32 + 1), &mut buf), Err(Errno::ENFILE));
    assert_eq!(h.read(Fd::from_raw(3), &mut buf), Err(Errno::EBADF));
    assert_eq!(h.close(Fd::from_raw(3)), Err(Errno::EBADF));
    assert_eq!(fx.fs.errno(), Errno::EBADF);
}

#[test]
fn test_zero_length_read_keeps_cursor() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/DATA.BIN", &pattern(2000));

    let fd = h.open("/DATA.BIN", OpenFlags::RDONLY).unwrap();
    assert_eq!(h.seek(fd, 100, SeekWhence::Set as i32).unwrap(), 100);
    assert_eq!(h.read(fd, &mut []).unwrap(), 0);
    assert_eq!(h.tell(fd).unwrap(), 100);
    h.close(fd).unwrap();
}

#[test]
fn test_write_then_seek_end_reports_size() {
    let fx = Fixture::new();
    let h = fx.sd();
    let data = pattern(1500);

    let fd = create(&*h, "/LOG.TXT").unwrap();
    assert_eq!(h.write(fd, &data).unwrap(), data.len());
    assert_eq!(h.seek(fd, 0, SeekWhence::End as i32).unwrap(), 1500);
    assert_eq!(h.tell(fd).unwrap(), 1500);
    assert_eq!(h.total(fd).unwrap(), 1500);
    h.close(fd).unwrap();
}

#[test]
fn test_seek_validation() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/S.BIN", &pattern(600));

    let fd = h.open("/S.BIN", OpenFlags::RDONLY).unwrap();
    assert_eq!(h.seek(fd, 0, 7), Err(Errno::EINVAL));
    assert_eq!(h.seek(fd, -1, SeekWhence::Set as i32), Err(Errno::EINVAL));
    assert_eq!(h.seek(fd, -100, SeekWhence::End as i32).unwrap(), 500);
    assert_eq!(h.seek(fd, 50, SeekWhence::Cur as i32).unwrap(), 550);
    // Read-only files do not grow on seek
    assert_eq!(h.seek(fd, 1000, SeekWhence::Set as i32).unwrap(), 600);
    h.close(fd).unwrap();
}

#[test]
fn test_write_without_trunc_needs_new_file() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/APP.TXT", b"hello");

    // Without TRUNC the engine is asked for a new file: FR_EXIST
    assert_eq!(h.open("/APP.TXT", OpenFlags::RDWR | OpenFlags::APPEND), Err(Errno::EACCES));
    assert_eq!(h.open("/APP.TXT", OpenFlags::WRONLY), Err(Errno::EACCES));

    // Appending to an empty file starts at 0
    let fd = h.open("/NEW.TXT", OpenFlags::WRONLY | OpenFlags::APPEND).unwrap();
    assert_eq!(h.tell(fd).unwrap(), 0);
    h.close(fd).unwrap();

    let fd = h.open("/APP.TXT", OpenFlags::RDWR | OpenFlags::TRUNC).unwrap();
    assert_eq!(h.total(fd).unwrap(), 0);
    h.close(fd).unwrap();
}

#[test]
fn test_invalid_open_mode() {
    let fx = Fixture::new();
    let h = fx.sd();
    assert_eq!(h.open("/X", OpenFlags::from_bits_retain(3)), Err(Errno::EINVAL));
    assert_eq!(fx.fs.open_handles(), 0);
}

#[test]
fn test_file_and_directory_ops_do_not_mix() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/F.TXT", b"x");

    let dir = h.open("/", OpenFlags::DIR).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(h.read(dir, &mut buf), Err(Errno::EISDIR));
    assert_eq!(h.write(dir, b"x"), Err(Errno::EISDIR));
    assert_eq!(h.tell(dir), Err(Errno::EISDIR));

    let file = h.open("/F.TXT", OpenFlags::RDONLY).unwrap();
    assert_eq!(h.readdir(file), Err(Errno::ENOTDIR));
    assert_eq!(h.rewinddir(file), Err(Errno::ENOTDIR));

    h.close(dir).unwrap();
    h.close(file).unwrap();
}

#[test]
fn test_fcntl() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/F.TXT", b"x");

    let fd = h.open("/F.TXT", OpenFlags::RDONLY).unwrap();
    assert_eq!(h.fcntl(fd, Fcntl::GetFl).unwrap(), OpenFlags::RDONLY.bits() as i32);
    assert_eq!(h.fcntl(fd, Fcntl::SetFl(0)).unwrap(), 0);
    assert_eq!(h.fcntl(fd, Fcntl::GetFd).unwrap(), 0);
    assert_eq!(h.fcntl(fd, Fcntl::Other(42)), Err(Errno::EINVAL));
    h.close(fd).unwrap();
}

#[test]
fn test_writes_denied_on_read_only_handle() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/RO.TXT", b"data");

    let fd = h.open("/RO.TXT", OpenFlags::RDONLY).unwrap();
    // FR_DENIED
    assert_eq!(h.write(fd, b"more"), Err(Errno::ENOSPC));
    h.close(fd).unwrap();
}
