use crate::accessor::TypedAccessor;
use crate::bridge::BufferBridge;
use crate::constants::page_size;
use crate::err::{Error, Result};
use crate::ffi::FileHandle;
use crate::flags::{MapFlags, Protection, SyncFlags};
use crate::handle::Handle;
use crate::mapped_region::{Backing, MappedRegion};
use crate::region_table::RegionTable;

use std::sync::Arc;

/// Parameters of a `map` call, built the same way for file and anonymous maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRequest {
    length: usize,
    protection: Protection,
    flags: MapFlags,
    backing: Backing,
    offset: i64,
}

impl MapRequest {
    /// Private, read-write, anonymous.
    pub fn anonymous(length: usize) -> Self {
        MapRequest {
            length: length,
            protection: Protection::READ | Protection::WRITE,
            flags: MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            backing: Backing::Anonymous,
            offset: 0,
        }
    }

    /// Shared, read-write, backed by `fd`.
    pub fn file(fd: FileHandle, length: usize) -> Self {
        MapRequest {
            length: length,
            protection: Protection::READ | Protection::WRITE,
            flags: MapFlags::SHARED,
            backing: Backing::Descriptor(fd),
            offset: 0,
        }
    }

    pub fn protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    pub fn shared(mut self) -> Self {
        self.flags = (self.flags - MapFlags::PRIVATE) | MapFlags::SHARED;
        self
    }

    pub fn private(mut self) -> Self {
        self.flags = (self.flags - MapFlags::SHARED) | MapFlags::PRIVATE;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Maps, flushes and unmaps regions, keeping a `RegionTable` in step.
#[derive(Clone)]
pub struct MappingService {
    table: Arc<RegionTable>,
}

impl MappingService {
    /// A service over its own, empty table.
    pub fn new() -> Self {
        MappingService::with_table(Arc::new(RegionTable::new()))
    }

    pub fn global() -> Self {
        MappingService::with_table(RegionTable::global())
    }

    pub fn with_table(table: Arc<RegionTable>) -> Self {
        MappingService { table: table }
    }

    pub fn table(&self) -> &Arc<RegionTable> {
        &self.table
    }

    pub fn accessor(&self) -> TypedAccessor {
        TypedAccessor::new(self.table.clone())
    }

    pub fn bridge(&self) -> BufferBridge {
        BufferBridge::new(self.clone())
    }

    pub fn map(&self, length: usize, protection: Protection, flags: MapFlags, backing: Backing, offset: i64) -> Result<Handle> {
        if length == 0 {
            return Err(Error::invalid_argument("length", "must be greater than 0"));
        }
        if length.checked_add(page_size()).is_none() {
            return Err(Error::invalid_argument("length", format!("{} exceeds the address space", length)));
        }
        if offset < 0 {
            return Err(Error::invalid_argument("offset", format!("{} is negative", offset)));
        }
        flags.validate()?;
        match backing {
            Backing::Anonymous if !flags.is_anonymous() => {
                return Err(Error::invalid_argument("fd", "anonymous backing requires MAP_ANONYMOUS"));
            }
            Backing::Descriptor(fd) if flags.is_anonymous() => {
                return Err(Error::invalid_argument("fd", format!("descriptor {} given with MAP_ANONYMOUS", fd)));
            }
            _ => {}
        }

        let region = MappedRegion::map(length, protection, flags, backing, offset as u64).map_err(Error::MapFailed)?;
        let handle = self.table.insert(region)?;
        debug!("mmap length={} prot={:?} flags={:?} backing={:?} offset={} -> {}",
               length, protection, flags, backing, offset, handle);
        Ok(handle)
    }

    pub fn map_request(&self, request: &MapRequest) -> Result<Handle> {
        self.map(request.length, request.protection, request.flags, request.backing, request.offset)
    }

    /// Copies `source` to the start of the region, then flushes that span.
    ///
    /// Returns the number of bytes flushed. A `source` longer than the region
    /// fails with `OutOfBounds` before anything is copied.
    pub fn sync(&self, handle: Handle, source: &[u8], flags: SyncFlags) -> Result<usize> {
        flags.validate()?;
        let synced = self.table.with_region(handle, |region| {
            if !source.is_empty() {
                region.write_bytes(0, source)?;
            }
            region.flush(source.len(), flags).map_err(Error::SyncFailed)?;
            Ok(source.len())
        })?;
        debug!("msync {} bytes={} flags={:?}", handle, synced, flags);
        Ok(synced)
    }

    /// Flushes the whole region without copying anything into it.
    pub fn flush(&self, handle: Handle, flags: SyncFlags) -> Result<()> {
        flags.validate()?;
        self.table.with_region(handle, |region| {
            region.flush(region.size(), flags).map_err(Error::SyncFailed)
        })?;
        debug!("flush {} flags={:?}", handle, flags);
        Ok(())
    }

    /// Releases the region. Releasing an already released handle is a no-op.
    pub fn unmap(&self, handle: Handle) -> Result<()> {
        match self.table.take(handle)? {
            Some(region) => {
                let length = region.size();
                region.unmap().map_err(Error::UnmapFailed)?;
                debug!("munmap {} length={}", handle, length);
            }
            None => trace!("munmap {} skipped, already released", handle),
        }
        Ok(())
    }
}

impl Default for MappingService {
    fn default() -> Self {
        MappingService::new()
    }
}

#[cfg(test)]
use crate::mapped_region::RegionState;

#[test]
fn test_map_set_get_unmap_scenario() {
    crate::init_test_logging();
    let service = MappingService::new();
    let handle = service.map(4096,
                             Protection::READ | Protection::WRITE,
                             MapFlags::PRIVATE | MapFlags::ANONYMOUS,
                             Backing::Anonymous,
                             0).unwrap();
    let accessor = service.accessor();
    accessor.write::<u32>(handle, 0, 0xDEADBEEF).unwrap();
    assert_eq!(accessor.read::<u32>(handle, 0).unwrap(), 0xDEADBEEF);

    service.unmap(handle).unwrap();
    match accessor.read::<u32>(handle, 0) {
        Err(Error::InvalidHandle(token)) => assert_eq!(token, handle.encode()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_double_unmap_is_noop() {
    crate::init_test_logging();
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(64)).unwrap();
    service.unmap(handle).unwrap();
    service.unmap(handle).unwrap();
    assert_eq!(service.table().released_count(), 1);
    assert_eq!(service.table().state(handle), Some(RegionState::Unmapped));
}

#[test]
fn test_unmap_unknown_handle() {
    let service = MappingService::new();
    let handle = Handle::decode("mmap:7").unwrap();
    match service.unmap(handle) {
        Err(Error::InvalidHandle(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_handle_does_not_resolve_in_another_service() {
    let a = MappingService::new();
    let b = MappingService::new();
    let ha = a.map_request(&MapRequest::anonymous(16)).unwrap();
    let hb = b.map_request(&MapRequest::anonymous(16)).unwrap();
    b.accessor().write::<u32>(hb, 0, 0x1234).unwrap();

    assert!(matches!(b.accessor().read::<u32>(ha, 0), Err(Error::InvalidHandle(_))));
    assert!(matches!(a.accessor().read::<u32>(hb, 0), Err(Error::InvalidHandle(_))));
    assert!(matches!(b.sync(ha, &[1], SyncFlags::SYNC), Err(Error::InvalidHandle(_))));
    assert!(matches!(b.unmap(ha), Err(Error::InvalidHandle(_))));
    assert!(matches!(a.unmap(hb), Err(Error::InvalidHandle(_))));

    assert_eq!(a.table().state(ha), Some(RegionState::Mapped));
    assert_eq!(b.accessor().read::<u32>(hb, 0).unwrap(), 0x1234);
    a.unmap(ha).unwrap();
    assert!(matches!(b.unmap(ha), Err(Error::InvalidHandle(_))));
}

#[test]
fn test_operations_after_unmap_fail() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(64)).unwrap();
    service.unmap(handle).unwrap();
    assert!(matches!(service.sync(handle, &[1], SyncFlags::SYNC), Err(Error::InvalidHandle(_))));
    assert!(matches!(service.flush(handle, SyncFlags::SYNC), Err(Error::InvalidHandle(_))));
    assert!(matches!(service.accessor().write::<u8>(handle, 0, 1), Err(Error::InvalidHandle(_))));
}

#[test]
fn test_map_rejects_bad_arguments() {
    let service = MappingService::new();
    let rw = Protection::READ | Protection::WRITE;
    let anon = MapFlags::PRIVATE | MapFlags::ANONYMOUS;

    assert!(matches!(service.map(0, rw, anon, Backing::Anonymous, 0),
                     Err(Error::InvalidArgument { parameter: "length", .. })));
    assert!(matches!(service.map(usize::max_value(), rw, anon, Backing::Anonymous, 0),
                     Err(Error::InvalidArgument { parameter: "length", .. })));
    assert!(matches!(service.map(16, rw, anon, Backing::Anonymous, -1),
                     Err(Error::InvalidArgument { parameter: "offset", .. })));
    assert!(matches!(service.map(16, rw, MapFlags::PRIVATE, Backing::Anonymous, 0),
                     Err(Error::InvalidArgument { parameter: "fd", .. })));
    assert!(matches!(service.map(16, rw, anon, Backing::Descriptor(0), 0),
                     Err(Error::InvalidArgument { parameter: "fd", .. })));
    assert!(matches!(service.map(16, rw, MapFlags::ANONYMOUS, Backing::Anonymous, 0),
                     Err(Error::InvalidArgument { parameter: "flags", .. })));
    assert!(service.table().is_empty());
}

#[test]
fn test_map_failed_carries_errno() {
    let service = MappingService::new();
    let err = service.map(16, Protection::READ, MapFlags::SHARED, Backing::Descriptor(987_654), 0).unwrap_err();
    assert!(matches!(err, Error::MapFailed(_)));
    assert_eq!(err.errno(), Some(libc::EBADF));
}

#[test]
fn test_sync_writes_through_to_file() {
    use std::io::Read;
    use std::os::unix::io::AsRawFd;

    crate::init_test_logging();
    let mut file = tempfile::tempfile().unwrap();
    file.set_len(4096).unwrap();

    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::file(file.as_raw_fd(), 4096)).unwrap();
    assert_eq!(service.sync(handle, b"hello mapping", SyncFlags::SYNC).unwrap(), 13);
    service.flush(handle, SyncFlags::ASYNC | SyncFlags::INVALIDATE).unwrap();
    service.unmap(handle).unwrap();

    let mut contents = vec![0u8; 13];
    file.read_exact(&mut contents).unwrap();
    assert_eq!(&contents[..], b"hello mapping");
}

#[test]
fn test_sync_larger_than_region_is_out_of_bounds() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(8)).unwrap();
    service.accessor().write::<u8>(handle, 0, 0x7f).unwrap();

    match service.sync(handle, &[0u8; 9], SyncFlags::SYNC) {
        Err(Error::OutOfBounds { width: 9, length: 8, .. }) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(service.accessor().read::<u8>(handle, 0).unwrap(), 0x7f);
    assert_eq!(service.sync(handle, &[0u8; 8], SyncFlags::ASYNC).unwrap(), 8);
    assert!(service.sync(handle, &[], SyncFlags::SYNC | SyncFlags::ASYNC).is_err());
}

#[test]
fn test_sync_on_read_only_region() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(8).protection(Protection::READ)).unwrap();
    assert!(matches!(service.sync(handle, &[1], SyncFlags::SYNC), Err(Error::ProtectionViolation { .. })));
    assert_eq!(service.sync(handle, &[], SyncFlags::SYNC).unwrap(), 0);
}

#[test]
fn test_unaligned_file_offset() {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    let mut file = tempfile::tempfile().unwrap();
    let mut contents = vec![0u8; page_size() * 2];
    contents[page_size() + 3] = 0xab;
    file.write_all(&contents).unwrap();

    let service = MappingService::new();
    let request = MapRequest::file(file.as_raw_fd(), 16).private().offset(page_size() as i64 + 3);
    let handle = service.map_request(&request).unwrap();
    let info = service.table().info(handle).unwrap();
    assert_eq!(info.offset, page_size() as u64 + 3);
    assert!(!info.flags.is_shared());
    assert_eq!(service.accessor().read::<u8>(handle, 0).unwrap(), 0xab);
    service.flush(handle, SyncFlags::SYNC).unwrap();
    service.unmap(handle).unwrap();
}

#[test]
fn test_concurrent_unmap_releases_once() {
    let service = MappingService::new();
    let handle = service.map_request(&MapRequest::anonymous(4096)).unwrap();

    let workers: Vec<_> = (0..8).map(|_| {
        let service = service.clone();
        std::thread::spawn(move || service.unmap(handle))
    }).collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    assert_eq!(service.table().released_count(), 1);
}
