//! Error Numbers
//!
//! The host VFS speaks POSIX-style error numbers. Every failing operation in
//! this crate reports one, and the adapter keeps the most recent value in a
//! per-filesystem cell so callers that only see a failure flag can still
//! query the cause.

use core::fmt;

use super::engine::FResult;

/// POSIX-style error number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// No error
    pub const NONE: Errno = Errno(0);
    pub const ENOENT: Errno = Errno(2);
    pub const EIO: Errno = Errno(5);
    pub const ENXIO: Errno = Errno(6);
    pub const EBADF: Errno = Errno(9);
    pub const EAGAIN: Errno = Errno(11);
    pub const ENOMEM: Errno = Errno(12);
    pub const EACCES: Errno = Errno(13);
    pub const EFAULT: Errno = Errno(14);
    pub const EEXIST: Errno = Errno(17);
    pub const ENODEV: Errno = Errno(19);
    pub const ENOTDIR: Errno = Errno(20);
    pub const EISDIR: Errno = Errno(21);
    pub const EINVAL: Errno = Errno(22);
    pub const ENFILE: Errno = Errno(23);
    pub const EMFILE: Errno = Errno(24);
    pub const ENOSPC: Errno = Errno(28);
    pub const EROFS: Errno = Errno(30);
    pub const ERANGE: Errno = Errno(34);
    pub const ENOSYS: Errno = Errno(38);
    pub const EIDRM: Errno = Errno(43);
    pub const ETIME: Errno = Errno(62);
    pub const EOVERFLOW: Errno = Errno(75);

    /// True for any value other than [`Errno::NONE`]
    pub const fn is_err(self) -> bool {
        self.0 != 0
    }

    /// Symbolic name, or "E?" for numbers this crate never produces
    pub fn name(self) -> &'static str {
        match self {
            Self::NONE => "OK",
            Self::ENOENT => "ENOENT",
            Self::EIO => "EIO",
            Self::ENXIO => "ENXIO",
            Self::EBADF => "EBADF",
            Self::EAGAIN => "EAGAIN",
            Self::ENOMEM => "ENOMEM",
            Self::EACCES => "EACCES",
            Self::EFAULT => "EFAULT",
            Self::EEXIST => "EEXIST",
            Self::ENODEV => "ENODEV",
            Self::ENOTDIR => "ENOTDIR",
            Self::EISDIR => "EISDIR",
            Self::EINVAL => "EINVAL",
            Self::ENFILE => "ENFILE",
            Self::EMFILE => "EMFILE",
            Self::ENOSPC => "ENOSPC",
            Self::EROFS => "EROFS",
            Self::ERANGE => "ERANGE",
            Self::ENOSYS => "ENOSYS",
            Self::EIDRM => "EIDRM",
            Self::ETIME => "ETIME",
            Self::EOVERFLOW => "EOVERFLOW",
            _ => "E?",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Error number for an engine result code.
///
/// `None` means the engine failed inside the disk layer; the device error
/// that caused it has already been recorded and must be kept.
pub const fn errno_for(rc: FResult) -> Option<Errno> {
    let errno = match rc {
        FResult::Ok => Errno::NONE,
        FResult::DiskErr => return None,
        FResult::IntErr => Errno::EFAULT,
        FResult::NotReady => Errno::ENODEV,
        FResult::NoFile | FResult::NoPath => Errno::ENOENT,
        FResult::InvalidName => Errno::EINVAL,
        FResult::Denied => Errno::ENOSPC,
        FResult::Exist => Errno::EACCES,
        FResult::InvalidObject => Errno::EBADF,
        FResult::WriteProtected => Errno::EROFS,
        FResult::InvalidDrive => Errno::ENXIO,
        FResult::NotEnabled => Errno::EIDRM,
        FResult::NoFilesystem => Errno::EIO,
        FResult::MkfsAborted => Errno::EINVAL,
        FResult::Timeout => Errno::ETIME,
        FResult::Locked => Errno::EAGAIN,
        FResult::NotEnoughCore => Errno::ENOMEM,
        FResult::TooManyOpenFiles => Errno::EMFILE,
        FResult::InvalidParameter => Errno::EINVAL,
    };
    Some(errno)
}

/// Update `cell` for an engine result, keeping it on a disk error
pub fn set_errno(cell: &mut Errno, rc: FResult) {
    if let Some(errno) = errno_for(rc) {
        *cell = errno;
    }
}

/// Update `cell` for a raw engine result code; unknown codes clear it
pub fn set_errno_raw(cell: &mut Errno, code: u8) {
    match FResult::from_code(code) {
        Some(rc) => set_errno(cell, rc),
        None => *cell = Errno::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_table() {
        let table = [
            (FResult::Ok, Errno::NONE),
            (FResult::IntErr, Errno::EFAULT),
            (FResult::NotReady, Errno::ENODEV),
            (FResult::NoFile, Errno::ENOENT),
            (FResult::NoPath, Errno::ENOENT),
            (FResult::InvalidName, Errno::EINVAL),
            (FResult::Denied, Errno::ENOSPC),
            (FResult::Exist, Errno::EACCES),
            (FResult::InvalidObject, Errno::EBADF),
            (FResult::WriteProtected, Errno::EROFS),
            (FResult::InvalidDrive, Errno::ENXIO),
            (FResult::NotEnabled, Errno::EIDRM),
            (FResult::NoFilesystem, Errno::EIO),
            (FResult::MkfsAborted, Errno::EINVAL),
            (FResult::Timeout, Errno::ETIME),
            (FResult::Locked, Errno::EAGAIN),
            (FResult::NotEnoughCore, Errno::ENOMEM),
            (FResult::TooManyOpenFiles, Errno::EMFILE),
            (FResult::InvalidParameter, Errno::EINVAL),
        ];
        for (rc, expected) in table {
            assert_eq!(errno_for(rc), Some(expected), "{}", rc.name());
        }
    }

    #[test]
    fn test_disk_error_preserves_device_errno() {
        let mut cell = Errno::EOVERFLOW;
        set_errno(&mut cell, FResult::DiskErr);
        assert_eq!(cell, Errno::EOVERFLOW);

        set_errno(&mut cell, FResult::NoFile);
        assert_eq!(cell, Errno::ENOENT);
    }

    #[test]
    fn test_unknown_code_clears() {
        let mut cell = Errno::EIO;
        set_errno_raw(&mut cell, 200);
        assert_eq!(cell, Errno::NONE);

        set_errno_raw(&mut cell, FResult::Locked as u8);
        assert_eq!(cell, Errno::EAGAIN);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Errno::ENOENT), "ENOENT (2)");
        assert_eq!(Errno(999).name(), "E?");
        assert!(!Errno::NONE.is_err());
    }
}
