//! Name-dispatched entry points for a host environment.
//!
//! Arguments arrive as loosely typed `Arg` values; each operation checks its
//! arity and converts its arguments before calling into the mapping service.
//! Handles cross this boundary only as opaque tokens.

use crate::accessor::{ElementKind, TypedAccessor};
use crate::bridge::BufferBridge;
use crate::constants::{self, Constant};
use crate::err::{Error, Result};
use crate::flags::{MapFlags, Protection, SyncFlags};
use crate::handle::Handle;
use crate::mapped_region::Backing;
use crate::service::MappingService;

use std::convert::TryFrom;

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Unit,
    Handle(String),
    Number(f64),
    Bytes(Vec<u8>),
}

pub struct Binding {
    service: MappingService,
    accessor: TypedAccessor,
    bridge: BufferBridge,
}

impl Binding {
    pub fn new(service: MappingService) -> Self {
        Binding {
            accessor: service.accessor(),
            bridge: service.bridge(),
            service: service,
        }
    }

    pub fn global() -> Self {
        Binding::new(MappingService::global())
    }

    pub fn constants(&self) -> &'static [Constant] {
        constants::constants()
    }

    pub fn call(&self, op: &str, args: &[Arg]) -> Result<Reply> {
        match op {
            "mmap" => {
                arity(op, args, 5)?;
                let length = integer(args, 0, "length")?;
                if length < 0 {
                    return Err(Error::invalid_argument("length", format!("{} is negative", length)));
                }
                let protection = Protection::from_raw(int32(args, 1, "protection")?)?;
                let flags = MapFlags::from_raw(int32(args, 2, "flags")?)?;
                let backing = Backing::from_raw(int32(args, 3, "fd")?);
                let offset = integer(args, 4, "offset")?;
                let handle = self.service.map(length as usize, protection, flags, backing, offset)?;
                Ok(Reply::Handle(handle.encode()))
            }
            "msync" => {
                arity(op, args, 3)?;
                let handle = handle(args, 0)?;
                let flags = SyncFlags::from_raw(int32(args, 2, "flags")?)?;
                let synced = self.service.sync(handle, bytes(args, 1, "buffer")?, flags)?;
                Ok(Reply::Number(synced as f64))
            }
            "flush" => {
                arity(op, args, 2)?;
                let flags = SyncFlags::from_raw(int32(args, 1, "flags")?)?;
                self.service.flush(handle(args, 0)?, flags)?;
                Ok(Reply::Unit)
            }
            "munmap" => {
                arity(op, args, 1)?;
                self.service.unmap(handle(args, 0)?)?;
                Ok(Reply::Unit)
            }
            "snapshot" => {
                arity(op, args, 1)?;
                let copy = self.bridge.snapshot(handle(args, 0)?)?;
                Ok(Reply::Bytes(copy.into_vec()))
            }
            _ => self.call_typed(op, args),
        }
    }

    fn call_typed(&self, op: &str, args: &[Arg]) -> Result<Reply> {
        if let Some(kind) = op.strip_prefix("get_").and_then(ElementKind::from_name) {
            arity(op, args, 2)?;
            let value = self.accessor.get(handle(args, 0)?, kind, index(args, 1)?)?;
            return Ok(Reply::Number(value.to_f64()));
        }
        if let Some(kind) = op.strip_prefix("set_").and_then(ElementKind::from_name) {
            arity(op, args, 3)?;
            self.accessor.set(handle(args, 0)?, kind, index(args, 1)?, number(args, 2, "value")?)?;
            return Ok(Reply::Unit);
        }
        Err(Error::invalid_argument("operation", format!("unknown operation {}", op)))
    }
}

fn arity(op: &str, args: &[Arg], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(Error::argument_count(op, expected, args.len()));
    }
    Ok(())
}

fn number(args: &[Arg], i: usize, name: &'static str) -> Result<f64> {
    match &args[i] {
        Arg::Number(v) => Ok(*v),
        other => Err(Error::invalid_argument(name, format!("expected a number, got {:?}", other))),
    }
}

fn integer(args: &[Arg], i: usize, name: &'static str) -> Result<i64> {
    let v = number(args, i, name)?;
    if v.fract() != 0.0 || v.abs() > crate::handle::MAX_TOKEN as f64 {
        return Err(Error::invalid_argument(name, format!("{} is not an integer", v)));
    }
    Ok(v as i64)
}

fn int32(args: &[Arg], i: usize, name: &'static str) -> Result<i32> {
    let v = integer(args, i, name)?;
    i32::try_from(v).map_err(|_| Error::invalid_argument(name, format!("{} does not fit in 32 bits", v)))
}

fn index(args: &[Arg], i: usize) -> Result<usize> {
    let v = integer(args, i, "index")?;
    if v < 0 {
        return Err(Error::invalid_argument("index", format!("{} is negative", v)));
    }
    Ok(v as usize)
}

fn bytes<'a>(args: &'a [Arg], i: usize, name: &'static str) -> Result<&'a [u8]> {
    match &args[i] {
        Arg::Bytes(b) => Ok(b.as_slice()),
        other => Err(Error::invalid_argument(name, format!("expected a buffer, got {:?}", other))),
    }
}

fn handle(args: &[Arg], i: usize) -> Result<Handle> {
    match &args[i] {
        Arg::Text(token) => Handle::decode(token),
        Arg::Number(bits) => Handle::from_f64(*bits),
        Arg::Bytes(_) => Err(Error::invalid_handle("<buffer>")),
    }
}

#[cfg(test)]
fn num<T: Into<f64>>(v: T) -> Arg {
    Arg::Number(v.into())
}

#[cfg(test)]
fn anonymous_args(length: f64) -> Vec<Arg> {
    vec![
        num(length),
        num(libc::PROT_READ | libc::PROT_WRITE),
        num(libc::MAP_PRIVATE | libc::MAP_ANON),
        num(-1),
        num(0),
    ]
}

#[test]
fn test_argument_count() {
    let binding = Binding::new(MappingService::new());
    match binding.call("mmap", &[num(8)]) {
        Err(Error::InvalidArgumentCount { expected: 5, actual: 1, .. }) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(binding.call("munmap", &[]), Err(Error::InvalidArgumentCount { .. })));
    assert!(matches!(binding.call("get_uint32", &[num(1)]), Err(Error::InvalidArgumentCount { .. })));
    assert!(matches!(binding.call("msync", &[num(1), num(2)]), Err(Error::InvalidArgumentCount { .. })));
}

#[test]
fn test_host_round_trip() {
    crate::init_test_logging();
    let binding = Binding::new(MappingService::new());
    let token = match binding.call("mmap", &anonymous_args(4096.0)).unwrap() {
        Reply::Handle(token) => token,
        other => panic!("unexpected {:?}", other),
    };
    let h = Arg::Text(token.clone());

    binding.call("set_uint32", &[h.clone(), num(0), num(0xDEADBEEFu32)]).unwrap();
    assert_eq!(binding.call("get_uint32", &[h.clone(), num(0)]).unwrap(), Reply::Number(3735928559.0));
    binding.call("set_float64", &[h.clone(), num(2), num(-2.5)]).unwrap();
    assert_eq!(binding.call("get_float64", &[h.clone(), num(2)]).unwrap(), Reply::Number(-2.5));

    let sync = binding.call("msync", &[h.clone(), Arg::Bytes(vec![9; 4]), num(libc::MS_SYNC)]).unwrap();
    assert_eq!(sync, Reply::Number(4.0));
    assert_eq!(binding.call("get_uint8", &[h.clone(), num(3)]).unwrap(), Reply::Number(9.0));
    binding.call("flush", &[h.clone(), num(libc::MS_ASYNC)]).unwrap();

    match binding.call("snapshot", &[h.clone()]).unwrap() {
        Reply::Bytes(copy) => assert_eq!(&copy[..4], &[9, 9, 9, 9]),
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(binding.call("munmap", &[h.clone()]).unwrap(), Reply::Unit);
    assert_eq!(binding.call("munmap", &[h.clone()]).unwrap(), Reply::Unit);
    assert!(matches!(binding.call("get_uint32", &[h, num(0)]), Err(Error::InvalidHandle(_))));
}

#[test]
fn test_numeric_handle_and_bad_arguments() {
    let binding = Binding::new(MappingService::new());
    let token = match binding.call("mmap", &anonymous_args(8.0)).unwrap() {
        Reply::Handle(token) => token,
        other => panic!("unexpected {:?}", other),
    };
    let bits = Handle::decode(&token).unwrap().to_bits() as f64;

    assert_eq!(binding.call("get_int16", &[num(bits), num(3)]).unwrap(), Reply::Number(0.0));
    assert!(matches!(binding.call("get_int16", &[num(bits), num(4)]), Err(Error::OutOfBounds { .. })));
    assert!(matches!(binding.call("get_int16", &[num(bits), num(-1)]), Err(Error::InvalidArgument { .. })));
    assert!(matches!(binding.call("get_int64", &[num(bits), num(0)]), Err(Error::InvalidArgument { .. })));
    assert!(matches!(binding.call("munmap", &[Arg::Text("0x7f0000000000".into())]), Err(Error::InvalidHandle(_))));
    assert!(matches!(binding.call("msync", &[num(bits), num(1), num(libc::MS_SYNC)]), Err(Error::InvalidArgument { .. })));
    assert!(matches!(binding.call("mmap", &anonymous_args(-8.0)), Err(Error::InvalidArgument { .. })));
    assert!(matches!(binding.call("mmap", &anonymous_args(0.5)), Err(Error::InvalidArgument { .. })));
}

#[test]
fn test_wide_flag_and_fd_values_are_rejected() {
    let binding = Binding::new(MappingService::new());
    let wide = (1u64 << 32) as f64;
    let prot_rw = (libc::PROT_READ | libc::PROT_WRITE) as f64;
    let private_anon = (libc::MAP_PRIVATE | libc::MAP_ANON) as f64;

    let mut args = anonymous_args(16.0);
    args[1] = num(wide + prot_rw);
    assert!(matches!(binding.call("mmap", &args), Err(Error::InvalidArgument { parameter: "protection", .. })));

    let mut args = anonymous_args(16.0);
    args[2] = num(wide + private_anon);
    assert!(matches!(binding.call("mmap", &args), Err(Error::InvalidArgument { parameter: "flags", .. })));

    let mut args = anonymous_args(16.0);
    args[3] = num(4294967295.0);
    assert!(matches!(binding.call("mmap", &args), Err(Error::InvalidArgument { parameter: "fd", .. })));

    let token = match binding.call("mmap", &anonymous_args(16.0)).unwrap() {
        Reply::Handle(token) => token,
        other => panic!("unexpected {:?}", other),
    };
    let flags = num(wide + libc::MS_SYNC as f64);
    assert!(matches!(binding.call("msync", &[Arg::Text(token.clone()), Arg::Bytes(vec![1]), flags.clone()]),
                     Err(Error::InvalidArgument { parameter: "flags", .. })));
    assert!(matches!(binding.call("flush", &[Arg::Text(token), flags]),
                     Err(Error::InvalidArgument { parameter: "flags", .. })));
    assert_eq!(binding.service.table().len(), 1);
}

#[test]
fn test_constants_exposed() {
    let binding = Binding::new(MappingService::new());
    let names: Vec<_> = binding.constants().iter().map(|c| c.name).collect();
    for name in &["PROT_READ", "PROT_WRITE", "PROT_EXEC", "PROT_NONE", "MAP_SHARED", "MAP_PRIVATE",
                  "PAGESIZE", "MS_ASYNC", "MS_SYNC", "MS_INVALIDATE"] {
        assert!(names.contains(name), "missing {}", name);
    }
}
