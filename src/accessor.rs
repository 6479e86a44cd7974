//! Bounds-checked scalar access to live regions.
//!
//! Element `i` of kind `K` occupies bytes `i * width(K) .. (i + 1) * width(K)`
//! of the region, in native byte order. Access past the recorded region length
//! fails with `OutOfBounds` before memory is touched.

use crate::err::{Error, Result};
use crate::handle::Handle;
use crate::region_table::RegionTable;

use std::mem;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Float32,
    Float64,
}

impl ElementKind {
    pub const ALL: [ElementKind; 8] = [
        ElementKind::Int8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Uint8,
        ElementKind::Uint16,
        ElementKind::Uint32,
        ElementKind::Float32,
        ElementKind::Float64,
    ];

    /// Size of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementKind::Int8 | ElementKind::Uint8 => 1,
            ElementKind::Int16 | ElementKind::Uint16 => 2,
            ElementKind::Int32 | ElementKind::Uint32 | ElementKind::Float32 => 4,
            ElementKind::Float64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Int8 => "int8",
            ElementKind::Int16 => "int16",
            ElementKind::Int32 => "int32",
            ElementKind::Uint8 => "uint8",
            ElementKind::Uint16 => "uint16",
            ElementKind::Uint32 => "uint32",
            ElementKind::Float32 => "float32",
            ElementKind::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<ElementKind> {
        ElementKind::ALL.iter().cloned().find(|kind| kind.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Float32(f32),
    Float64(f64),
}

impl Scalar {
    pub fn kind(&self) -> ElementKind {
        match *self {
            Scalar::Int8(_) => ElementKind::Int8,
            Scalar::Int16(_) => ElementKind::Int16,
            Scalar::Int32(_) => ElementKind::Int32,
            Scalar::Uint8(_) => ElementKind::Uint8,
            Scalar::Uint16(_) => ElementKind::Uint16,
            Scalar::Uint32(_) => ElementKind::Uint32,
            Scalar::Float32(_) => ElementKind::Float32,
            Scalar::Float64(_) => ElementKind::Float64,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Scalar::Int8(v) => v as f64,
            Scalar::Int16(v) => v as f64,
            Scalar::Int32(v) => v as f64,
            Scalar::Uint8(v) => v as f64,
            Scalar::Uint16(v) => v as f64,
            Scalar::Uint32(v) => v as f64,
            Scalar::Float32(v) => v as f64,
            Scalar::Float64(v) => v,
        }
    }

    /// Converts a host number to `kind`.
    ///
    /// Integer kinds drop the fraction and wrap modulo their width; NaN and
    /// infinities become 0.
    pub fn convert(value: f64, kind: ElementKind) -> Scalar {
        let int = if value.is_finite() { value.trunc() as i64 } else { 0 };
        match kind {
            ElementKind::Int8 => Scalar::Int8(int as i8),
            ElementKind::Int16 => Scalar::Int16(int as i16),
            ElementKind::Int32 => Scalar::Int32(int as i32),
            ElementKind::Uint8 => Scalar::Uint8(int as u8),
            ElementKind::Uint16 => Scalar::Uint16(int as u16),
            ElementKind::Uint32 => Scalar::Uint32(int as u32),
            ElementKind::Float32 => Scalar::Float32(value as f32),
            ElementKind::Float64 => Scalar::Float64(value),
        }
    }
}

/// A scalar type that can be stored in a region.
pub trait Element: Copy {
    const KIND: ElementKind;

    fn from_ne_slice(bytes: &[u8]) -> Self;

    fn write_ne_slice(self, out: &mut [u8]);

    fn into_scalar(self) -> Scalar;
}

macro_rules! element {
    ($ty:ty, $kind:ident) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$kind;

            fn from_ne_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn write_ne_slice(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$kind(self)
            }
        }
    };
}

element!(i8, Int8);
element!(i16, Int16);
element!(i32, Int32);
element!(u8, Uint8);
element!(u16, Uint16);
element!(u32, Uint32);
element!(f32, Float32);
element!(f64, Float64);

fn element_offset(index: usize, width: usize, length: usize) -> Result<usize> {
    index.checked_mul(width).ok_or(Error::OutOfBounds {
        offset: usize::max_value(),
        width: width,
        length: length,
    })
}

pub struct TypedAccessor {
    table: Arc<RegionTable>,
}

impl TypedAccessor {
    pub fn new(table: Arc<RegionTable>) -> Self {
        TypedAccessor { table: table }
    }

    pub fn read<T: Element>(&self, handle: Handle, index: usize) -> Result<T> {
        let width = T::KIND.width();
        self.table.with_region(handle, |region| {
            let offset = element_offset(index, width, region.size())?;
            let mut raw = [0u8; 8];
            region.read_bytes(offset, &mut raw[..width])?;
            Ok(T::from_ne_slice(&raw[..width]))
        })
    }

    pub fn write<T: Element>(&self, handle: Handle, index: usize, value: T) -> Result<()> {
        let width = T::KIND.width();
        let mut raw = [0u8; 8];
        value.write_ne_slice(&mut raw[..width]);
        self.table.with_region(handle, |region| {
            let offset = element_offset(index, width, region.size())?;
            region.write_bytes(offset, &raw[..width])
        })
    }

    pub fn get(&self, handle: Handle, kind: ElementKind, index: usize) -> Result<Scalar> {
        Ok(match kind {
            ElementKind::Int8 => self.read::<i8>(handle, index)?.into_scalar(),
            ElementKind::Int16 => self.read::<i16>(handle, index)?.into_scalar(),
            ElementKind::Int32 => self.read::<i32>(handle, index)?.into_scalar(),
            ElementKind::Uint8 => self.read::<u8>(handle, index)?.into_scalar(),
            ElementKind::Uint16 => self.read::<u16>(handle, index)?.into_scalar(),
            ElementKind::Uint32 => self.read::<u32>(handle, index)?.into_scalar(),
            ElementKind::Float32 => self.read::<f32>(handle, index)?.into_scalar(),
            ElementKind::Float64 => self.read::<f64>(handle, index)?.into_scalar(),
        })
    }

    /// Writes `value` converted to `kind` (see `Scalar::convert`).
    pub fn set(&self, handle: Handle, kind: ElementKind, index: usize, value: f64) -> Result<()> {
        self.put(handle, index, Scalar::convert(value, kind))
    }

    pub fn put(&self, handle: Handle, index: usize, value: Scalar) -> Result<()> {
        match value {
            Scalar::Int8(v) => self.write(handle, index, v),
            Scalar::Int16(v) => self.write(handle, index, v),
            Scalar::Int32(v) => self.write(handle, index, v),
            Scalar::Uint8(v) => self.write(handle, index, v),
            Scalar::Uint16(v) => self.write(handle, index, v),
            Scalar::Uint32(v) => self.write(handle, index, v),
            Scalar::Float32(v) => self.write(handle, index, v),
            Scalar::Float64(v) => self.write(handle, index, v),
        }
    }
}

#[cfg(test)]
use crate::service::{MapRequest, MappingService};

#[cfg(test)]
fn sample(kind: ElementKind) -> f64 {
    match kind {
        ElementKind::Int8 => -100.0,
        ElementKind::Int16 => -30_000.0,
        ElementKind::Int32 => -2_000_000_000.0,
        ElementKind::Uint8 => 250.0,
        ElementKind::Uint16 => 65_000.0,
        ElementKind::Uint32 => 4_000_000_000.0,
        ElementKind::Float32 => 1.5,
        ElementKind::Float64 => -0.1,
    }
}

#[cfg(test)]
fn round_trip_every_kind(request: MapRequest) {
    let service = MappingService::new();
    let accessor = service.accessor();
    let handle = service.map_request(&request).unwrap();

    for &kind in ElementKind::ALL.iter() {
        for &index in &[0, 1, 7] {
            accessor.set(handle, kind, index, sample(kind)).unwrap();
            let value = accessor.get(handle, kind, index).unwrap();
            assert_eq!(value.kind(), kind);
            assert_eq!(value.to_f64(), sample(kind), "{} at {} via {:?}", kind.name(), index, request);
        }
    }
    service.unmap(handle).unwrap();
}

#[test]
fn test_round_trip_every_kind() {
    round_trip_every_kind(MapRequest::anonymous(4096));
}

#[test]
fn test_round_trip_every_kind_shared_anonymous() {
    round_trip_every_kind(MapRequest::anonymous(4096).shared());
}

#[test]
fn test_round_trip_every_kind_file_backed() {
    use std::os::unix::io::AsRawFd;

    let file = tempfile::tempfile().unwrap();
    file.set_len(4096).unwrap();
    round_trip_every_kind(MapRequest::file(file.as_raw_fd(), 4096));
    round_trip_every_kind(MapRequest::file(file.as_raw_fd(), 4096).private());
}

#[test]
fn test_exact_boundary_every_kind() {
    let service = MappingService::new();
    let accessor = service.accessor();
    let length = 24;
    let handle = service.map_request(&MapRequest::anonymous(length)).unwrap();

    for &kind in ElementKind::ALL.iter() {
        let last = length / kind.width() - 1;
        accessor.set(handle, kind, last, 1.0).unwrap();
        assert_eq!(accessor.get(handle, kind, last).unwrap().to_f64(), 1.0);

        match accessor.get(handle, kind, last + 1) {
            Err(Error::OutOfBounds { offset, width, length: 24 }) => {
                assert_eq!(offset, (last + 1) * kind.width());
                assert_eq!(width, kind.width());
            }
            other => panic!("{}: unexpected {:?}", kind.name(), other),
        }
        assert!(matches!(accessor.set(handle, kind, last + 1, 1.0), Err(Error::OutOfBounds { .. })));
        assert!(matches!(accessor.get(handle, kind, usize::max_value()), Err(Error::OutOfBounds { .. })));
    }
}

#[test]
fn test_set_converts_to_element_kind() {
    let service = MappingService::new();
    let accessor = service.accessor();
    let handle = service.map_request(&MapRequest::anonymous(16)).unwrap();

    accessor.set(handle, ElementKind::Uint8, 0, 257.9).unwrap();
    assert_eq!(accessor.read::<u8>(handle, 0).unwrap(), 1);
    accessor.set(handle, ElementKind::Int8, 0, -1.0).unwrap();
    assert_eq!(accessor.read::<u8>(handle, 0).unwrap(), 0xff);
    accessor.set(handle, ElementKind::Int32, 1, f64::NAN).unwrap();
    assert_eq!(accessor.read::<i32>(handle, 1).unwrap(), 0);

    // A one-byte write leaves its neighbours alone.
    accessor.write::<u32>(handle, 3, 0x11223344).unwrap();
    accessor.write::<u8>(handle, 13, 0xaa).unwrap();
    assert_eq!(accessor.read::<u32>(handle, 3).unwrap().to_ne_bytes()[1], 0xaa);
    assert_eq!(accessor.read::<u8>(handle, 12).unwrap(), 0x11223344u32.to_ne_bytes()[0]);
}

#[test]
fn test_protection_is_enforced() {
    let service = MappingService::new();
    let accessor = service.accessor();
    let read_only = service.map_request(&MapRequest::anonymous(16).protection(crate::flags::Protection::READ)).unwrap();
    assert_eq!(accessor.read::<u32>(read_only, 0).unwrap(), 0);
    assert!(matches!(accessor.write::<u32>(read_only, 0, 1), Err(Error::ProtectionViolation { .. })));

    let none = service.map_request(&MapRequest::anonymous(16).protection(crate::flags::Protection::empty())).unwrap();
    assert!(matches!(accessor.read::<u8>(none, 0), Err(Error::ProtectionViolation { .. })));
}

#[test]
fn test_kind_names() {
    for &kind in ElementKind::ALL.iter() {
        assert_eq!(ElementKind::from_name(kind.name()), Some(kind));
    }
    assert_eq!(ElementKind::from_name("int64"), None);
}
