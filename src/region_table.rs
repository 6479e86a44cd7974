//! Registry of live mappings keyed by `Handle`.
//!
//! Every dereference of mapped memory happens inside `with_region`, under the
//! table lock, so a region can never be unmapped while it is being accessed.

use crate::err::{Error, ErrCode, Result};
use crate::handle::Handle;
use crate::mapped_region::{MappedRegion, RegionInfo, RegionState};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// Shared by every table, so a handle names at most one region in the process.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    static ref GLOBAL_TABLE: Arc<RegionTable> = Arc::new(RegionTable::new());
}

struct Slots {
    regions: HashMap<Handle, MappedRegion>,
    retired: HashSet<Handle>,
    released: u64,
}

pub struct RegionTable {
    slots: Mutex<Slots>,
}

impl RegionTable {
    pub fn new() -> Self {
        RegionTable {
            slots: Mutex::new(Slots {
                regions: HashMap::new(),
                retired: HashSet::new(),
                released: 0,
            }),
        }
    }

    /// The process-wide table.
    pub fn global() -> Arc<RegionTable> {
        GLOBAL_TABLE.clone()
    }

    // A panic inside `with_region` never leaves a half-updated entry, so a
    // poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn insert(&self, region: MappedRegion) -> Result<Handle> {
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let handle = Handle::from_sequence(seq).ok_or(Error::MapFailed(ErrCode::from_raw(libc::ENOMEM)))?;
        self.lock().regions.insert(handle, region);
        Ok(handle)
    }

    /// Runs `f` against the live region named by `handle`.
    ///
    /// The table stays locked while `f` runs; `f` must not call back into
    /// the same table, directly or by dropping a view that releases into it.
    pub fn with_region<F, R>(&self, handle: Handle, f: F) -> Result<R>
        where F: FnOnce(&mut MappedRegion) -> Result<R>
    {
        let mut slots = self.lock();
        match slots.regions.get_mut(&handle) {
            Some(region) => f(region),
            None => Err(Error::invalid_handle(handle)),
        }
    }

    /// Removes the region from the table.
    ///
    /// `Ok(None)` means the handle was issued here but is already released.
    /// Exactly one caller ever receives `Some` for a given handle.
    pub(crate) fn take(&self, handle: Handle) -> Result<Option<MappedRegion>> {
        let mut slots = self.lock();
        match slots.regions.remove(&handle) {
            Some(region) => {
                slots.retired.insert(handle);
                slots.released += 1;
                Ok(Some(region))
            }
            None if slots.retired.contains(&handle) => Ok(None),
            None => Err(Error::invalid_handle(handle)),
        }
    }

    /// `None` for handles this table never issued.
    pub fn state(&self, handle: Handle) -> Option<RegionState> {
        let slots = self.lock();
        if slots.regions.contains_key(&handle) {
            Some(RegionState::Mapped)
        } else if slots.retired.contains(&handle) {
            Some(RegionState::Unmapped)
        } else {
            None
        }
    }

    pub fn info(&self, handle: Handle) -> Result<RegionInfo> {
        self.with_region(handle, |region| Ok(region.info()))
    }

    pub fn len(&self) -> usize {
        self.lock().regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of regions handed out for release so far.
    pub fn released_count(&self) -> u64 {
        self.lock().released
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        RegionTable::new()
    }
}

#[cfg(test)]
fn anonymous_region(len: usize) -> MappedRegion {
    use crate::flags::{MapFlags, Protection};
    use crate::mapped_region::Backing;

    MappedRegion::map(len,
                      Protection::READ | Protection::WRITE,
                      MapFlags::PRIVATE | MapFlags::ANONYMOUS,
                      Backing::Anonymous,
                      0).unwrap()
}

#[test]
fn test_insert_lookup_take() {
    let table = RegionTable::new();
    let handle = table.insert(anonymous_region(128)).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.state(handle), Some(RegionState::Mapped));
    assert_eq!(table.info(handle).unwrap().length, 128);

    let region = table.take(handle).unwrap().unwrap();
    region.unmap().unwrap();
    assert!(table.is_empty());
    assert_eq!(table.state(handle), Some(RegionState::Unmapped));
    assert!(table.take(handle).unwrap().is_none());
    assert_eq!(table.released_count(), 1);
}

#[test]
fn test_handles_are_never_reused() {
    let table = RegionTable::new();
    let first = table.insert(anonymous_region(16)).unwrap();
    drop(table.take(first).unwrap());
    let second = table.insert(anonymous_region(16)).unwrap();
    assert_ne!(first, second);
    match table.with_region(first, |_| Ok(())) {
        Err(Error::InvalidHandle(_)) => {}
        other => panic!("stale handle resolved: {:?}", other.is_ok()),
    }
}

#[test]
fn test_handles_are_unique_across_tables() {
    let a = RegionTable::new();
    let b = RegionTable::new();
    let ha = a.insert(anonymous_region(16)).unwrap();
    let hb = b.insert(anonymous_region(16)).unwrap();
    assert_ne!(ha, hb);
    assert_eq!(b.state(ha), None);
    assert!(matches!(b.take(ha), Err(Error::InvalidHandle(_))));

    drop(a.take(ha).unwrap());
    assert_eq!(a.state(ha), Some(RegionState::Unmapped));
    assert_eq!(b.state(ha), None);
    assert!(matches!(b.take(ha), Err(Error::InvalidHandle(_))));
    assert_eq!(b.state(hb), Some(RegionState::Mapped));
}

#[test]
fn test_unissued_handle() {
    let table = RegionTable::new();
    let handle = Handle::decode("mmap:99").unwrap();
    assert_eq!(table.state(handle), None);
    assert!(table.take(handle).is_err());
    assert!(table.info(handle).is_err());
}
