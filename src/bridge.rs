//! Host-visible buffers over mapped memory.
//!
//! A `ZeroCopyView` is backed by the mapping itself and is responsible for
//! releasing it: dropping or releasing the view unmaps the region once. A
//! `Snapshot` is an independent copy; the region stays mapped until it is
//! unmapped explicitly.

use crate::err::{Error, Result};
use crate::handle::Handle;
use crate::mapped_region::ViewOwnership;
use crate::service::MappingService;

use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    ZeroCopy,
    Snapshot,
}

impl Default for ViewMode {
    fn default() -> Self {
        ViewMode::Snapshot
    }
}

pub enum HostBuffer {
    Mapped(ZeroCopyView),
    Detached(Snapshot),
}

impl HostBuffer {
    pub fn handle(&self) -> Handle {
        match self {
            HostBuffer::Mapped(view) => view.handle(),
            HostBuffer::Detached(copy) => copy.handle(),
        }
    }

    pub fn mode(&self) -> ViewMode {
        match self {
            HostBuffer::Mapped(_) => ViewMode::ZeroCopy,
            HostBuffer::Detached(_) => ViewMode::Snapshot,
        }
    }
}

pub struct BufferBridge {
    service: MappingService,
}

impl BufferBridge {
    pub fn new(service: MappingService) -> Self {
        BufferBridge { service: service }
    }

    pub fn view(&self, handle: Handle, mode: ViewMode) -> Result<HostBuffer> {
        match mode {
            ViewMode::ZeroCopy => self.zero_copy(handle).map(HostBuffer::Mapped),
            ViewMode::Snapshot => self.snapshot(handle).map(HostBuffer::Detached),
        }
    }

    /// Hands release of the region over to the returned view.
    pub fn zero_copy(&self, handle: Handle) -> Result<ZeroCopyView> {
        let len = self.service.table().with_region(handle, |region| {
            if region.view() == ViewOwnership::OwnedByView {
                return Err(Error::ViewAlreadyOwned(handle));
            }
            region.set_view(ViewOwnership::OwnedByView);
            Ok(region.size())
        })?;
        Ok(ZeroCopyView {
            service: self.service.clone(),
            handle: handle,
            len: len,
            released: false,
        })
    }

    pub fn snapshot(&self, handle: Handle) -> Result<Snapshot> {
        let bytes = self.service.table().with_region(handle, |region| Ok(region.as_slice()?.to_vec()))?;
        Ok(Snapshot {
            handle: handle,
            bytes: bytes,
        })
    }
}

/// A buffer whose storage is the mapped region.
///
/// Every access goes through the region table, so a view whose region was
/// unmapped explicitly reports `InvalidHandle` instead of touching freed
/// pages.
pub struct ZeroCopyView {
    service: MappingService,
    handle: Handle,
    len: usize,
    released: bool,
}

impl ZeroCopyView {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.service.table().with_region(self.handle, |region| region.read_bytes(offset, buf))
    }

    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.service.table().with_region(self.handle, |region| region.write_bytes(offset, data))
    }

    /// Runs `f` over the mapped bytes.
    ///
    /// The region table stays locked while `f` runs. Dropping or releasing
    /// any `ZeroCopyView` of the same service inside `f`, or calling the
    /// service from it, blocks forever on that lock. Return what `f` needs
    /// and release views after it has returned.
    pub fn with_bytes<F, R>(&self, f: F) -> Result<R>
        where F: FnOnce(&[u8]) -> R
    {
        self.service.table().with_region(self.handle, |region| Ok(f(region.as_slice()?)))
    }

    /// Mutable form of `with_bytes`, under the same locking rule.
    pub fn with_bytes_mut<F, R>(&mut self, f: F) -> Result<R>
        where F: FnOnce(&mut [u8]) -> R
    {
        self.service.table().with_region(self.handle, |region| Ok(f(region.as_mut_slice()?)))
    }

    /// Unmaps the region now, reporting a failed `munmap`.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.service.unmap(self.handle)
    }
}

impl Drop for ZeroCopyView {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.service.unmap(self.handle) {
            warn!("releasing zero-copy view of {} failed: {}", self.handle, err);
        }
    }
}

/// A point-in-time copy of a region. Carries no unmap obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    handle: Handle,
    bytes: Vec<u8>,
}

impl Snapshot {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl Deref for Snapshot {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for Snapshot {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
use crate::mapped_region::RegionState;
#[cfg(test)]
use crate::service::MapRequest;

#[test]
fn test_zero_copy_release_unmaps_once() {
    crate::init_test_logging();
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(4096)).unwrap();
    let mut view = service.bridge().zero_copy(handle).unwrap();
    assert_eq!(view.len(), 4096);
    assert_eq!(service.table().info(handle).unwrap().view, ViewOwnership::OwnedByView);

    view.write(10, b"abc").unwrap();
    assert_eq!(service.accessor().read::<u8>(handle, 11).unwrap(), b'b');
    service.accessor().write::<u8>(handle, 0, 7).unwrap();
    assert_eq!(view.with_bytes(|bytes| bytes[0]).unwrap(), 7);

    view.release().unwrap();
    assert_eq!(service.table().state(handle), Some(RegionState::Unmapped));
    service.unmap(handle).unwrap();
    assert_eq!(service.table().released_count(), 1);
}

#[test]
fn test_zero_copy_drop_releases() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(64)).unwrap();
    {
        let mut view = service.bridge().zero_copy(handle).unwrap();
        view.with_bytes_mut(|bytes| bytes[63] = 1).unwrap();
    }
    assert_eq!(service.table().state(handle), Some(RegionState::Unmapped));
    assert!(matches!(service.accessor().read::<u8>(handle, 63), Err(Error::InvalidHandle(_))));
    service.unmap(handle).unwrap();
    assert_eq!(service.table().released_count(), 1);
}

#[test]
fn test_release_after_reading_bytes() {
    let service = MappingService::new();
    let first = service.map_request(&MapRequest::anonymous(32)).unwrap();
    let second = service.map_request(&MapRequest::anonymous(32)).unwrap();
    let mut source = service.bridge().zero_copy(first).unwrap();
    let other = service.bridge().zero_copy(second).unwrap();

    source.with_bytes_mut(|bytes| bytes[..4].copy_from_slice(b"view")).unwrap();
    let copied = source.with_bytes(|bytes| bytes[..4].to_vec()).unwrap();
    other.release().unwrap();
    source.release().unwrap();

    assert_eq!(copied, b"view");
    assert!(service.table().is_empty());
    assert_eq!(service.table().released_count(), 2);
}

#[test]
fn test_explicit_unmap_before_view_release() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(64)).unwrap();
    let view = service.bridge().zero_copy(handle).unwrap();

    service.unmap(handle).unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(view.read(0, &mut buf), Err(Error::InvalidHandle(_))));
    view.release().unwrap();
    assert_eq!(service.table().released_count(), 1);
}

#[test]
fn test_second_zero_copy_view_is_refused() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(64)).unwrap();
    let view = service.bridge().zero_copy(handle).unwrap();
    assert!(matches!(service.bridge().zero_copy(handle), Err(Error::ViewAlreadyOwned(h)) if h == handle));
    drop(view);
}

#[test]
fn test_snapshot_is_detached() {
    let service = MappingService::new();
    let accessor = service.accessor();
    let handle = service.map_request(&MapRequest::anonymous(16)).unwrap();
    accessor.write::<u32>(handle, 0, 0xDEADBEEF).unwrap();

    let mut copy = match service.bridge().view(handle, ViewMode::Snapshot).unwrap() {
        HostBuffer::Detached(copy) => copy,
        HostBuffer::Mapped(_) => panic!("expected a snapshot"),
    };
    assert_eq!(copy.len(), 16);
    assert_eq!(&copy[..4], &0xDEADBEEFu32.to_ne_bytes());
    copy[0] ^= 0xff;

    assert_eq!(accessor.read::<u32>(handle, 0).unwrap(), 0xDEADBEEF);
    assert_eq!(service.table().state(handle), Some(RegionState::Mapped));
    assert_eq!(service.table().info(handle).unwrap().view, ViewOwnership::NoView);
    drop(copy);
    assert_eq!(service.table().state(handle), Some(RegionState::Mapped));

    service.unmap(handle).unwrap();
    assert_eq!(service.table().state(handle), Some(RegionState::Unmapped));
}

#[test]
fn test_snapshot_needs_read_access() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(16).protection(crate::flags::Protection::WRITE)).unwrap();
    assert!(matches!(service.bridge().snapshot(handle), Err(Error::ProtectionViolation { .. })));
}

#[test]
fn test_view_mode_default() {
    assert_eq!(ViewMode::default(), ViewMode::Snapshot);
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(16)).unwrap();
    let buffer = service.bridge().view(handle, ViewMode::ZeroCopy).unwrap();
    assert_eq!(buffer.mode(), ViewMode::ZeroCopy);
    assert_eq!(buffer.handle(), handle);
    drop(buffer);
    assert_eq!(service.table().state(handle), Some(RegionState::Unmapped));
}
