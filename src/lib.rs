//! Handle-based access to memory mapped with `mmap(2)`.
//!
//! Regions are named by opaque `Handle` tokens that only resolve through a
//! `RegionTable`; no raw address ever leaves the crate. Reads and writes are
//! bounds-checked against the mapped length, and every region is unmapped
//! exactly once, either by `MappingService::unmap` or by the zero-copy view
//! that owns it.
//!
//! ```no_run
//! use mmap_region::{MapRequest, MappingService};
//!
//! let service = MappingService::global();
//! let handle = service.map_request(&MapRequest::anonymous(4096))?;
//! service.accessor().write::<u32>(handle, 0, 0xDEADBEEF)?;
//! assert_eq!(service.accessor().read::<u32>(handle, 0)?, 0xDEADBEEF);
//! service.unmap(handle)?;
//! # Ok::<(), mmap_region::Error>(())
//! ```

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate log;

extern crate libc;

mod ffi;

pub mod accessor;
pub mod binding;
pub mod bridge;
pub mod constants;
pub mod err;
pub mod flags;
pub mod handle;
pub mod mapped_region;
pub mod region_table;
pub mod service;

pub use self::accessor::{Element, ElementKind, Scalar, TypedAccessor};
pub use self::binding::{Arg, Binding, Reply};
pub use self::bridge::{BufferBridge, HostBuffer, Snapshot, ViewMode, ZeroCopyView};
pub use self::constants::{page_size, Constant};
pub use self::err::{ErrCode, Error, Result};
pub use self::ffi::FileHandle;
pub use self::flags::{MapFlags, Protection, SyncFlags};
pub use self::handle::Handle;
pub use self::mapped_region::{Backing, MappedRegion, RegionInfo, RegionState, ViewOwnership};
pub use self::region_table::RegionTable;
pub use self::service::{MapRequest, MappingService};

#[cfg(test)]
fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_global_service_shares_one_table() {
    let service = MappingService::global();
    let handle = service.map_request(&MapRequest::anonymous(32)).unwrap();
    assert_eq!(MappingService::global().table().state(handle), Some(RegionState::Mapped));
    Binding::global().call("munmap", &[Arg::Text(handle.encode())]).unwrap();
    assert_eq!(RegionTable::global().state(handle), Some(RegionState::Unmapped));
}
