use std::fmt;
use std::io;

/// Raw `errno` value reported by a failed system call.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ErrCode(i32);

impl ErrCode {
    pub fn last_error() -> Self {
        ErrCode(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    pub fn from_raw(code: i32) -> Self {
        ErrCode(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Debug for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ErrCode({}, {:?})", self.0, io::Error::from_raw_os_error(self.0).kind())
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

impl From<ErrCode> for io::Error {
    fn from(ec: ErrCode) -> Self {
        io::Error::from_raw_os_error(ec.0)
    }
}

pub const SUCCESS: ErrCode = ErrCode(0);
pub const INVALID_ARGUMENT: ErrCode = ErrCode(libc::EINVAL);
pub const BAD_DESCRIPTOR: ErrCode = ErrCode(libc::EBADF);
