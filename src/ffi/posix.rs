use crate::err::ErrCode;

use std::ptr::{self, NonNull};

pub type FileHandle = i32;

/// Descriptor value passed to `mmap` for anonymous mappings.
pub const NO_FILE: FileHandle = -1;

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

pub unsafe fn mmap(len: usize, prot: i32, flags: i32, fd: FileHandle, offset: i64) -> Result<NonNull<u8>, ErrCode> {
    match libc::mmap(ptr::null_mut(), len, prot, flags, fd, offset as libc::off_t) {
        libc::MAP_FAILED => Err(ErrCode::last_error()),
        base => NonNull::new(base as *mut u8).ok_or_else(ErrCode::last_error),
    }
}

pub unsafe fn msync(base: NonNull<u8>, len: usize, flags: i32) -> Result<(), ErrCode> {
    match libc::msync(base.as_ptr() as *mut libc::c_void, len, flags) {
        -1 => Err(ErrCode::last_error()),
        _ => Ok(()),
    }
}

pub unsafe fn munmap(base: NonNull<u8>, len: usize) -> Result<(), ErrCode> {
    match libc::munmap(base.as_ptr() as *mut libc::c_void, len) {
        -1 => Err(ErrCode::last_error()),
        _ => Ok(()),
    }
}

#[test]
fn test_page_size_is_power_of_two() {
    let ps = page_size();
    assert!(ps >= 4096);
    assert!(ps.is_power_of_two());
}

#[test]
fn test_raw_map_unmap() {
    let len = page_size();
    let base = unsafe {
        mmap(len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_PRIVATE | libc::MAP_ANON, NO_FILE, 0)
    }.unwrap();
    unsafe {
        *base.as_ptr() = 0x41;
        assert_eq!(*base.as_ptr(), 0x41);
        munmap(base, len).unwrap();
    }
}

#[test]
fn test_raw_map_rejects_zero_length() {
    let res = unsafe { mmap(0, libc::PROT_READ, libc::MAP_PRIVATE | libc::MAP_ANON, NO_FILE, 0) };
    assert_eq!(res.unwrap_err().code(), libc::EINVAL);
}
