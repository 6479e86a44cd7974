//! Opaque region tokens.
//!
//! A `Handle` is a process-wide sequence number handed out when a region is
//! mapped; it carries no address. Decoding a token only yields a candidate
//! that still has to be resolved through the table before any memory is
//! touched.

use crate::err::{Error, Result};

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

const TOKEN_PREFIX: &str = "mmap:";

/// Largest token value a host double can carry without rounding.
pub const MAX_TOKEN: u64 = (1 << 53) - 1;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    pub(crate) fn from_sequence(seq: u64) -> Option<Handle> {
        if seq > MAX_TOKEN {
            return None;
        }
        NonZeroU64::new(seq).map(Handle)
    }

    pub fn to_bits(&self) -> u64 {
        self.0.get()
    }

    pub fn from_bits(bits: u64) -> Result<Handle> {
        Handle::from_sequence(bits).ok_or_else(|| Error::invalid_handle(bits))
    }

    /// Accepts an integral number in `1..=MAX_TOKEN`.
    pub fn from_f64(value: f64) -> Result<Handle> {
        if value.fract() != 0.0 || value < 1.0 || value > MAX_TOKEN as f64 {
            return Err(Error::invalid_handle(value));
        }
        Handle::from_bits(value as u64)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(token: &str) -> Result<Handle> {
        token.parse()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{:x}", TOKEN_PREFIX, self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({})", self)
    }
}

impl FromStr for Handle {
    type Err = Error;

    fn from_str(token: &str) -> Result<Handle> {
        let digits = token.strip_prefix(TOKEN_PREFIX).ok_or_else(|| Error::invalid_handle(token))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_handle(token));
        }
        u64::from_str_radix(digits, 16)
            .ok()
            .and_then(Handle::from_sequence)
            .ok_or_else(|| Error::invalid_handle(token))
    }
}

#[test]
fn test_token_round_trip() {
    let handle = Handle::from_sequence(0x2a).unwrap();
    assert_eq!(handle.encode(), "mmap:2a");
    assert_eq!(Handle::decode("mmap:2a").unwrap(), handle);
    assert_eq!(Handle::from_bits(handle.to_bits()).unwrap(), handle);
    assert_eq!(Handle::from_f64(42.0).unwrap(), handle);
}

#[test]
fn test_decode_rejects_addresses_and_garbage() {
    for token in &["0x7f00deadb000", "7f00deadb000", "mmap:", "mmap:0", "mmap:-1", "mmap:+1", "mmap:zz", "mmap:ffffffffffffffff"] {
        match Handle::decode(token) {
            Err(Error::InvalidHandle(t)) => assert_eq!(&t, token),
            other => panic!("{} decoded to {:?}", token, other),
        }
    }
}

#[test]
fn test_numeric_range() {
    assert!(Handle::from_bits(0).is_err());
    assert!(Handle::from_bits(MAX_TOKEN + 1).is_err());
    assert!(Handle::from_bits(MAX_TOKEN).is_ok());
    assert!(Handle::from_f64(1.5).is_err());
    assert!(Handle::from_f64(-3.0).is_err());
    assert!(Handle::from_f64(f64::NAN).is_err());
}
