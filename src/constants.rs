//! Read-only constants published to the host: protection, mapping and sync
//! flags plus the platform page size. Resolved once, never mutated.

use crate::ffi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    pub name: &'static str,
    pub value: i64,
}

lazy_static! {
    static ref PAGE_SIZE: usize = ffi::page_size();

    static ref CONSTANTS: Vec<Constant> = vec![
        Constant { name: "PROT_READ", value: libc::PROT_READ as i64 },
        Constant { name: "PROT_WRITE", value: libc::PROT_WRITE as i64 },
        Constant { name: "PROT_EXEC", value: libc::PROT_EXEC as i64 },
        Constant { name: "PROT_NONE", value: libc::PROT_NONE as i64 },
        Constant { name: "MAP_SHARED", value: libc::MAP_SHARED as i64 },
        Constant { name: "MAP_PRIVATE", value: libc::MAP_PRIVATE as i64 },
        Constant { name: "MAP_ANONYMOUS", value: libc::MAP_ANON as i64 },
        Constant { name: "PAGESIZE", value: *PAGE_SIZE as i64 },
        Constant { name: "MS_ASYNC", value: libc::MS_ASYNC as i64 },
        Constant { name: "MS_SYNC", value: libc::MS_SYNC as i64 },
        Constant { name: "MS_INVALIDATE", value: libc::MS_INVALIDATE as i64 },
    ];
}

pub fn page_size() -> usize {
    *PAGE_SIZE
}

pub fn constants() -> &'static [Constant] {
    &CONSTANTS
}

pub fn lookup(name: &str) -> Option<i64> {
    CONSTANTS.iter().find(|c| c.name == name).map(|c| c.value)
}

#[test]
fn test_constant_table() {
    assert_eq!(lookup("PROT_NONE"), Some(0));
    assert_eq!(lookup("MAP_PRIVATE"), Some(libc::MAP_PRIVATE as i64));
    assert_eq!(lookup("PAGESIZE"), Some(page_size() as i64));
    assert_eq!(lookup("MAP_FIXED"), None);
    assert_eq!(constants().len(), 11);
}
