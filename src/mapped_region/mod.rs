use crate::constants::page_size;
use crate::err::{Error, Result};
use crate::ffi::FileHandle;
use crate::flags::{MapFlags, Protection};

use std::ptr;
use std::slice;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use self::unix::*;

/// What the mapping is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Anonymous,
    Descriptor(FileHandle),
}

impl Backing {
    /// Negative descriptors are the anonymous sentinel.
    pub fn from_raw(fd: FileHandle) -> Self {
        if fd < 0 {
            Backing::Anonymous
        } else {
            Backing::Descriptor(fd)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    Mapped,
    Unmapped,
}

/// Whether a zero-copy view has taken over releasing the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOwnership {
    NoView,
    OwnedByView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub length: usize,
    pub protection: Protection,
    pub flags: MapFlags,
    pub backing: Backing,
    pub offset: u64,
    pub view: ViewOwnership,
}

/// The page-aligned request that covers `size` bytes at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageSpan {
    aligned_offset: u64,
    map_len: usize,
    page_offset: usize,
}

fn page_span(offset: u64, size: usize) -> PageSpan {
    let page_offset = (offset % page_size() as u64) as usize;
    PageSpan {
        aligned_offset: offset - page_offset as u64,
        map_len: size + page_offset,
        page_offset: page_offset,
    }
}

impl MappedRegion {
    /// Fails unless `width` bytes starting at `offset` lie inside the region.
    pub fn check_span(&self, offset: usize, width: usize) -> Result<()> {
        match offset.checked_add(width) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset: offset,
                width: width,
                length: self.size(),
            }),
        }
    }

    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.protection().require(Protection::READ)?;
        self.check_span(offset, buf.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.data().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.protection().require(Protection::WRITE)?;
        self.check_span(offset, data.len())?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.data().add(offset), data.len());
        }
        Ok(())
    }

    pub fn as_slice(&self) -> Result<&[u8]> {
        self.protection().require(Protection::READ)?;
        Ok(unsafe { slice::from_raw_parts(self.data(), self.size()) })
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        self.protection().require(Protection::READ | Protection::WRITE)?;
        Ok(unsafe { slice::from_raw_parts_mut(self.data(), self.size()) })
    }
}

#[test]
fn test_page_span() {
    let ps = page_size() as u64;
    let aligned = page_span(0, 16);
    assert_eq!(aligned, PageSpan { aligned_offset: 0, map_len: 16, page_offset: 0 });
    assert_eq!(page_span(2 * ps, 16), PageSpan { aligned_offset: 2 * ps, map_len: 16, page_offset: 0 });

    let unaligned = page_span(ps + 3, 16);
    assert_eq!(unaligned.aligned_offset, ps);
    assert_eq!(unaligned.map_len, 19);
    assert_eq!(unaligned.page_offset, 3);

    let last = page_span(ps - 1, 1);
    assert_eq!(last, PageSpan { aligned_offset: 0, map_len: ps as usize, page_offset: ps as usize - 1 });
}

#[test]
fn test_backing_sentinel() {
    assert_eq!(Backing::from_raw(-1), Backing::Anonymous);
    assert_eq!(Backing::from_raw(3), Backing::Descriptor(3));
}

#[test]
fn test_region_bytes() {
    let prot = Protection::READ | Protection::WRITE;
    let flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
    let mut region = MappedRegion::map(64, prot, flags, Backing::Anonymous, 0).unwrap();

    region.write_bytes(60, &[1, 2, 3, 4]).unwrap();
    let mut buf = [0u8; 4];
    region.read_bytes(60, &mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3, 4]);
    assert_eq!(&region.as_slice().unwrap()[60..], &[1, 2, 3, 4]);

    assert!(region.write_bytes(61, &[0; 4]).is_err());
    assert!(region.check_span(usize::max_value(), 2).is_err());
    region.unmap().unwrap();
}

#[test]
fn test_region_protection_none() {
    let flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
    let region = MappedRegion::map(16, Protection::empty(), flags, Backing::Anonymous, 0).unwrap();
    let mut buf = [0u8; 1];
    match region.read_bytes(0, &mut buf) {
        Err(Error::ProtectionViolation { .. }) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(region.as_slice().is_err());
}
