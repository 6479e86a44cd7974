#[cfg(unix)]
mod posix;

#[cfg(unix)]
pub use self::posix::*;
