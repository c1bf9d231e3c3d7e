mod common;

use common::{pattern, read_file, write_file, Fixture};
use fatfs_vfs::config::FsConfig;
use fatfs_vfs::fs::time::FixedClock;
use fatfs_vfs::fs::vfs::{mode_bits, OpenFlags};
use fatfs_vfs::mock::{SimEngine, SimFormat};
use fatfs_vfs::Errno;

// 2024-02-29 13:45:30 UTC
const LEAP_DAY: i64 = 1_709_214_330;

#[test]
fn test_round_trip_across_remount() {
    let fx = Fixture::new();
    let h = fx.sd();
    let data = pattern(10_000);

    let fd = h
        .open("/DATA.BIN", OpenFlags::WRONLY | OpenFlags::TRUNC)
        .unwrap();
    assert_eq!(h.write(fd, &data[..4000]).unwrap(), 4000);
    assert_eq!(h.write(fd, &data[4000..]).unwrap(), 6000);
    h.complete(fd).unwrap();
    h.close(fd).unwrap();
    assert_eq!(read_file(&*h, "/DATA.BIN"), data);

    fx.fs.unmount("/sd").unwrap();
    drop(h);
    let h = fx.sd();
    assert_eq!(read_file(&*h, "/DATA.BIN"), data);
}

#[test]
fn test_unaligned_overwrite() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/PATCH.BIN", &[0xAA; 1300]);

    let fd = h.open("/PATCH.BIN", OpenFlags::RDWR | OpenFlags::TRUNC).unwrap();
    h.write(fd, &[0xAA; 1300]).unwrap();
    h.seek(fd, 510, 0).unwrap();
    h.write(fd, &[1, 2, 3, 4]).unwrap();
    h.close(fd).unwrap();

    let got = read_file(&*h, "/PATCH.BIN");
    assert_eq!(got.len(), 1300);
    assert_eq!(&got[508..516], &[0xAA, 0xAA, 1, 2, 3, 4, 0xAA, 0xAA]);
}

#[test]
fn test_mmap() {
    let fx = Fixture::new();
    let h = fx.sd();
    let data = pattern(3000);
    write_file(&*h, "/MAP.BIN", &data);
    write_file(&*h, "/EMPTY.BIN", &[]);

    let fd = h.open("/MAP.BIN", OpenFlags::RDONLY).unwrap();
    assert_eq!(h.mmap(fd).unwrap(), data);
    h.close(fd).unwrap();

    let fd = h.open("/EMPTY.BIN", OpenFlags::RDONLY).unwrap();
    assert_eq!(h.mmap(fd), Err(Errno::EINVAL));
    h.close(fd).unwrap();
}

#[test]
fn test_directories() {
    let fx = Fixture::new();
    let h = fx.sd();
    h.mkdir("/docs").unwrap();
    write_file(&*h, "/docs/readme.txt", b"hi there");
    write_file(&*h, "/docs/NOTES.TXT", &pattern(700));
    h.mkdir("/docs/old").unwrap();
    assert_eq!(h.mkdir("/docs"), Err(Errno::EACCES));
    assert_eq!(h.mkdir("/missing/sub"), Err(Errno::ENOENT));

    let dir = h.open("/docs", OpenFlags::DIR).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = h.readdir(dir).unwrap() {
        seen.push((entry.name.clone(), entry.size, entry.is_dir()));
    }
    assert_eq!(
        seen,
        vec![
            ("readme.txt".to_string(), 8, false),
            ("NOTES.TXT".to_string(), 700, false),
            ("old".to_string(), -1, true),
        ]
    );
    assert_eq!(h.readdir(dir).unwrap(), None);

    h.rewinddir(dir).unwrap();
    assert_eq!(h.readdir(dir).unwrap().unwrap().name, "readme.txt");
    h.close(dir).unwrap();

    assert_eq!(h.open("/nowhere", OpenFlags::DIR), Err(Errno::ENOENT));
}

#[test]
fn test_root_listing() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/ONE.TXT", b"1");
    h.mkdir("/TWO").unwrap();

    let dir = h.open("", OpenFlags::DIR).unwrap();
    let first = h.readdir(dir).unwrap().unwrap();
    let second = h.readdir(dir).unwrap().unwrap();
    assert_eq!(first.name, "ONE.TXT");
    assert_eq!(second.name, "TWO");
    assert!(second.is_dir());
    assert_eq!(h.readdir(dir).unwrap(), None);
    h.close(dir).unwrap();
}

#[test]
fn test_rename_and_unlink() {
    let fx = Fixture::new();
    let h = fx.sd();
    h.mkdir("/a").unwrap();
    write_file(&*h, "/a/f.bin", &pattern(900));

    h.rename("/a", "/b").unwrap();
    assert_eq!(read_file(&*h, "/b/f.bin"), pattern(900));
    assert_eq!(h.stat("/a/f.bin", 0), Err(Errno::ENOENT));

    assert_eq!(h.rename("/nope", "/x"), Err(Errno::ENOENT));
    write_file(&*h, "/c.bin", b"c");
    assert_eq!(h.rename("/c.bin", "/b/f.bin"), Err(Errno::EACCES));

    // A non-empty directory is refused: FR_DENIED
    assert_eq!(h.rmdir("/b"), Err(Errno::ENOSPC));
    h.unlink("/b/f.bin").unwrap();
    h.rmdir("/b").unwrap();
    assert_eq!(h.unlink("/b/f.bin"), Err(Errno::ENOENT));
    assert_eq!(fx.fs.errno(), Errno::ENOENT);
}

#[test]
fn test_unlink_frees_space() {
    let fx = Fixture::new();
    let h = fx.sd();
    write_file(&*h, "/BIG.BIN", &pattern(64 * 1024));
    h.unlink("/BIG.BIN").unwrap();
    write_file(&*h, "/BIG.BIN", &pattern(64 * 1024));
    assert_eq!(read_file(&*h, "/BIG.BIN"), pattern(64 * 1024));
}

#[test]
fn test_stat() {
    let fx = Fixture::build(
        SimEngine::new(),
        SimFormat::new(1),
        FsConfig::new(),
        Box::new(FixedClock(LEAP_DAY)),
    );
    let drive = fx.mount("/sd");
    let h = fx.handler("/sd");
    write_file(&*h, "/S.BIN", &pattern(1025));
    h.mkdir("/D").unwrap();

    let st = h.stat("/S.BIN", 0).unwrap();
    assert_eq!(st.st_size, 1025);
    assert_eq!(st.st_blksize, 512);
    assert_eq!(st.st_blocks, 3);
    assert_eq!(st.st_nlink, 1);
    assert_eq!(st.st_dev, drive as u64 + 1);
    assert_eq!(st.st_mode, mode_bits::S_IFREG | mode_bits::S_IRX_ALL);
    assert_eq!(st.st_mtime, LEAP_DAY);
    assert_eq!(st.st_atime, LEAP_DAY);
    assert!(!st.is_dir());

    let st = h.stat("/D", 0).unwrap();
    assert!(st.is_dir());
    assert_eq!(st.st_size, -1);

    let st = h.stat("/", 0).unwrap();
    assert!(st.is_dir());
    assert_eq!(st.st_mode, mode_bits::S_IFDIR | mode_bits::S_IRX_ALL);

    assert_eq!(h.stat("/NOPE", 0), Err(Errno::ENOENT));

    let fd = h.open("/S.BIN", OpenFlags::RDONLY).unwrap();
    let st = h.fstat(fd).unwrap();
    assert_eq!(st.st_size, 1025);
    assert_eq!(st.st_blocks, 3);
    h.close(fd).unwrap();

    let dir = h.open("/D", OpenFlags::DIR).unwrap();
    assert!(h.fstat(dir).unwrap().is_dir());
    h.close(dir).unwrap();
}

#[test]
fn test_readdir_times() {
    let fx = Fixture::build(
        SimEngine::new(),
        SimFormat::new(1),
        FsConfig::new(),
        Box::new(FixedClock(LEAP_DAY)),
    );
    let h = fx.sd();
    write_file(&*h, "/T.TXT", b"t");

    let dir = h.open("/", OpenFlags::DIR).unwrap();
    assert_eq!(h.readdir(dir).unwrap().unwrap().time, LEAP_DAY);
    h.close(dir).unwrap();
}

#[test]
fn test_unsupported_operations() {
    let fx = Fixture::new();
    let h = fx.sd();
    assert_eq!(h.link("/a", "/b"), Err(Errno::ENOSYS));
    assert_eq!(h.symlink("/a", "/b"), Err(Errno::ENOSYS));
}
