#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use self::unix::*;

use crate::flags::Protection;
use crate::handle::Handle;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a region operation can report to its caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{operation} requires {expected} arguments, got {actual}")]
    InvalidArgumentCount {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid argument {parameter}: {message}")]
    InvalidArgument {
        parameter: &'static str,
        message: String,
    },

    #[error("mmap failed: {0}")]
    MapFailed(ErrCode),

    #[error("msync failed: {0}")]
    SyncFailed(ErrCode),

    #[error("munmap failed: {0}")]
    UnmapFailed(ErrCode),

    /// The token never named a region, or the region is already unmapped.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("out of bounds: {width} bytes at offset {offset} exceed region length {length}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        length: usize,
    },

    #[error("protection violation: requires {required:?}, region has {actual:?}")]
    ProtectionViolation {
        required: Protection,
        actual: Protection,
    },

    #[error("region {0} is already owned by a zero-copy view")]
    ViewAlreadyOwned(Handle),
}

impl Error {
    pub fn invalid_argument(parameter: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            parameter,
            message: message.into(),
        }
    }

    pub fn argument_count(operation: impl Into<String>, expected: usize, actual: usize) -> Self {
        Error::InvalidArgumentCount {
            operation: operation.into(),
            expected,
            actual,
        }
    }

    pub fn invalid_handle(token: impl ToString) -> Self {
        Error::InvalidHandle(token.to_string())
    }

    /// OS error code carried by `MapFailed`, `SyncFailed` and `UnmapFailed`.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::MapFailed(ec) | Error::SyncFailed(ec) | Error::UnmapFailed(ec) => Some(ec.code()),
            _ => None,
        }
    }
}

#[test]
fn test_errcode() {
    assert_eq!(SUCCESS, SUCCESS);
    assert_eq!(INVALID_ARGUMENT.code(), libc::EINVAL);
    let io_err: std::io::Error = BAD_DESCRIPTOR.into();
    assert_eq!(io_err.raw_os_error(), Some(libc::EBADF));
}

#[test]
fn test_errno_only_for_os_failures() {
    assert_eq!(Error::MapFailed(INVALID_ARGUMENT).errno(), Some(libc::EINVAL));
    assert_eq!(Error::UnmapFailed(INVALID_ARGUMENT).errno(), Some(libc::EINVAL));
    assert_eq!(Error::invalid_handle("mmap:1").errno(), None);
}

#[test]
fn test_error_display() {
    let err = Error::argument_count("mmap", 5, 2);
    assert_eq!(err.to_string(), "mmap requires 5 arguments, got 2");

    let err = Error::OutOfBounds { offset: 4096, width: 4, length: 4096 };
    assert!(err.to_string().contains("region length 4096"));
}
