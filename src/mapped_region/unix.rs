use super::{page_span, Backing, RegionInfo, ViewOwnership};
use crate::err::ErrCode;
use crate::ffi;
use crate::flags::{MapFlags, Protection, SyncFlags};

use std::mem;
use std::ptr::NonNull;

/// One live OS mapping. Dropping it unmaps the pages.
pub struct MappedRegion {
    base: NonNull<u8>,
    size: usize,
    page_offset: usize,
    protection: Protection,
    flags: MapFlags,
    backing: Backing,
    offset: u64,
    view: ViewOwnership,
}

// The pointer is only dereferenced by whoever holds the region, and the
// region table hands it out under its lock.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    pub(crate) fn map(size: usize, protection: Protection, flags: MapFlags, backing: Backing, offset: u64) -> Result<Self, ErrCode> {
        let span = page_span(offset, size);
        let fd = match backing {
            Backing::Anonymous => ffi::NO_FILE,
            Backing::Descriptor(fd) => fd,
        };

        let base = unsafe {
            ffi::mmap(span.map_len,
                      protection.bits(),
                      flags.bits(),
                      fd,
                      span.aligned_offset as i64)?
        };
        Ok(MappedRegion {
            base: base,
            size: size,
            page_offset: span.page_offset,
            protection: protection,
            flags: flags,
            backing: backing,
            offset: offset,
            view: ViewOwnership::NoView,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn view(&self) -> ViewOwnership {
        self.view
    }

    pub(crate) fn set_view(&mut self, view: ViewOwnership) {
        self.view = view;
    }

    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            length: self.size,
            protection: self.protection,
            flags: self.flags,
            backing: self.backing,
            offset: self.offset,
            view: self.view,
        }
    }

    pub(crate) fn data(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.page_offset) }
    }

    /// msync the first `bytes` bytes of the region.
    pub(crate) fn flush(&self, bytes: usize, flags: SyncFlags) -> Result<(), ErrCode> {
        unsafe { ffi::msync(self.base, self.page_offset + bytes, flags.bits()) }
    }

    pub(crate) fn unmap(self) -> Result<(), ErrCode> {
        let base = self.base;
        let len = self.size + self.page_offset;
        mem::forget(self);
        unsafe { ffi::munmap(base, len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = ffi::munmap(self.base, self.size + self.page_offset);
        }
    }
}
