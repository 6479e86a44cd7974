use crate::err::{Error, Result};

bitflags! {
    /// Page protection requested at map time. The empty set is `PROT_NONE`.
    pub struct Protection: i32 {
        const READ = libc::PROT_READ;
        const WRITE = libc::PROT_WRITE;
        const EXEC = libc::PROT_EXEC;
    }
}

bitflags! {
    pub struct MapFlags: i32 {
        const SHARED = libc::MAP_SHARED;
        const PRIVATE = libc::MAP_PRIVATE;
        const ANONYMOUS = libc::MAP_ANON;
    }
}

bitflags! {
    pub struct SyncFlags: i32 {
        const ASYNC = libc::MS_ASYNC;
        const SYNC = libc::MS_SYNC;
        const INVALIDATE = libc::MS_INVALIDATE;
    }
}

impl Protection {
    pub fn from_raw(bits: i32) -> Result<Self> {
        Protection::from_bits(bits)
            .ok_or_else(|| Error::invalid_argument("protection", format!("unknown bits {:#x}", bits)))
    }

    pub(crate) fn require(self, required: Protection) -> Result<()> {
        if self.contains(required) {
            Ok(())
        } else {
            Err(Error::ProtectionViolation {
                required,
                actual: self,
            })
        }
    }
}

impl MapFlags {
    /// Exactly one of `SHARED` and `PRIVATE` must be present.
    pub fn from_raw(bits: i32) -> Result<Self> {
        let flags = MapFlags::from_bits(bits)
            .ok_or_else(|| Error::invalid_argument("flags", format!("unknown bits {:#x}", bits)))?;
        flags.validate()?;
        Ok(flags)
    }

    pub fn validate(self) -> Result<()> {
        if self.contains(MapFlags::SHARED) == self.contains(MapFlags::PRIVATE) {
            return Err(Error::invalid_argument("flags", "exactly one of MAP_SHARED and MAP_PRIVATE is required"));
        }
        Ok(())
    }

    pub fn is_shared(self) -> bool {
        self.contains(MapFlags::SHARED)
    }

    pub fn is_anonymous(self) -> bool {
        self.contains(MapFlags::ANONYMOUS)
    }
}

impl SyncFlags {
    pub fn from_raw(bits: i32) -> Result<Self> {
        let flags = SyncFlags::from_bits(bits)
            .ok_or_else(|| Error::invalid_argument("sync flags", format!("unknown bits {:#x}", bits)))?;
        flags.validate()?;
        Ok(flags)
    }

    /// `MS_ASYNC` and `MS_SYNC` are mutually exclusive.
    pub fn validate(self) -> Result<()> {
        if self.contains(SyncFlags::ASYNC | SyncFlags::SYNC) {
            return Err(Error::invalid_argument("sync flags", "MS_ASYNC and MS_SYNC are mutually exclusive"));
        }
        Ok(())
    }
}

#[test]
fn test_protection_bits() {
    assert_eq!(Protection::from_raw(libc::PROT_NONE).unwrap(), Protection::empty());
    assert_eq!(
        Protection::from_raw(libc::PROT_READ | libc::PROT_WRITE).unwrap(),
        Protection::READ | Protection::WRITE
    );
    assert!(Protection::from_raw(0x4000).is_err());
}

#[test]
fn test_protection_require() {
    let rw = Protection::READ | Protection::WRITE;
    assert!(rw.require(Protection::WRITE).is_ok());
    match Protection::READ.require(Protection::WRITE) {
        Err(Error::ProtectionViolation { required, actual }) => {
            assert_eq!(required, Protection::WRITE);
            assert_eq!(actual, Protection::READ);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_map_flags_sharing_mode() {
    assert!(MapFlags::from_raw(libc::MAP_SHARED).unwrap().is_shared());
    assert!(MapFlags::from_raw(libc::MAP_PRIVATE | libc::MAP_ANON).unwrap().is_anonymous());
    assert!(MapFlags::from_raw(libc::MAP_SHARED | libc::MAP_PRIVATE).is_err());
    assert!(MapFlags::from_raw(libc::MAP_ANON).is_err());
}

#[test]
fn test_sync_flags() {
    assert!(SyncFlags::from_raw(libc::MS_SYNC | libc::MS_INVALIDATE).is_ok());
    assert!(SyncFlags::from_raw(libc::MS_SYNC | libc::MS_ASYNC).is_err());
}
