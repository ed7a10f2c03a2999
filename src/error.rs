use std::io;

use crate::vm::GuestAddress;

/// Anything that stops an image from being launched at all.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("unable to {action} image {path:?}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("bad image magic {found:#010x}")]
    BadMagic { found: u32 },

    #[error("invalid image: {reason}")]
    InvalidImage { reason: &'static str },

    #[error("relocation {index} refers to word {entry}, limit is {limit}")]
    InvalidRelocation { index: u64, entry: u32, limit: u64 },

    #[error("unable to allocate {size:#x} bytes: {source}")]
    Alloc {
        size: usize,
        #[source]
        source: region::Error,
    },

    #[error("unable to protect stack guard page: {0}")]
    Protect(#[source] region::Error),

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },

    #[error("foreign code cannot be run on this host")]
    UnsupportedHost,
}

/// POSIX error numbers handed back to the foreign program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Errno {
    ENOENT = 2,
    EINVAL = 22,
    EMFILE = 24,
}

impl Errno {
    /// The syscall return value, i.e. the negated error number.
    pub fn as_return(self) -> u64 {
        (-(self as i64)) as u64
    }
}

/// The foreign program stepped outside what we emulate. Ends the run.
#[derive(thiserror::Error, Debug)]
pub enum Fault {
    #[error("unsupported syscall {0}")]
    UnknownSyscall(u64),

    #[error("unsupported ioctl request {request:#x} on fd {fd}")]
    UnknownIoctl { fd: i64, request: u64 },

    #[error("bad file descriptor {fd} for {op}")]
    BadDescriptor { fd: i64, op: &'static str },

    #[error("unsupported seek origin {0}")]
    UnsupportedWhence(u64),

    #[error("unsupported open flags {0:#x}")]
    UnsupportedOpenFlags(u64),

    #[error("bad address {addr:?} (length {len:#x})")]
    BadAddress { addr: GuestAddress, len: u64 },

    #[error("storage error: {0}")]
    Storage(#[source] io::Error),

    #[error("console error: {0}")]
    Console(#[source] io::Error),
}

/// Error side of a syscall handler: either an error code for the program, or a fault that ends
/// it.
#[derive(thiserror::Error, Debug)]
pub enum SysError {
    #[error("{0:?}")]
    Errno(Errno),
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl From<Errno> for SysError {
    fn from(errno: Errno) -> Self {
        SysError::Errno(errno)
    }
}

pub type SysResult<T> = Result<T, SysError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_returns_are_negative() {
        assert_eq!(Errno::ENOENT.as_return() as i64, -2);
        assert_eq!(Errno::EINVAL.as_return() as i64, -22);
        assert_eq!(Errno::EMFILE.as_return() as i64, -24);
    }

    #[test]
    fn faults_convert_into_sys_errors() {
        let err: SysError = Fault::UnknownSyscall(99).into();
        assert!(matches!(err, SysError::Fault(Fault::UnknownSyscall(99))));
        assert_eq!(err.to_string(), "unsupported syscall 99");
        let err: SysError = Errno::EMFILE.into();
        assert_eq!(err.to_string(), "EMFILE");
    }
}
