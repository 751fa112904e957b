#![warn(missing_docs)]

//! This module defines the identifier space of the overlay.
//!
//! A [Did] is a fixed width unsigned integer, stored big-endian, with a width that is
//! a multiple of 8 bits between 8 and 512. The identifiers of one ring share a width,
//! and all arithmetic wraps around `2^width`, so the identifiers form a circle:
//!
//! * Addition is closed and wraps: `a + b` is truncated to the wider operand.
//!
//! * Every element has an additive inverse: `a + (-a) == 0`.
//!
//! * Subtraction is addition of the two's complement: `a - b == a + (-b)`.
//!
//! Operands of different widths behave as if the narrower one was zero-extended on the left.
//!
//! ## Intervals
//!
//! Because the space is circular, "between" only makes sense relative to a direction.
//! All interval tests walk clockwise from the lower bound to the upper bound. When the bounds
//! coincide the interval spans the whole ring, minus the bound itself for the non-closed tests.

use std::cmp::Ordering;
use std::hash::Hash;
use std::hash::Hasher;
use std::ops::Add;
use std::ops::Neg;
use std::ops::Sub;
use std::str::FromStr;

use num_bigint::BigUint;
use rand::RngCore;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use tiny_keccak::Hasher as KeccakHasher;
use tiny_keccak::Sha3;

use crate::consts::MAX_ID_BYTES;
use crate::error::Error;
use crate::error::Result;

/// Did is a finite cyclic ring R(P) where P = 2^width.
/// Bytes are kept right aligned in a fixed buffer so that narrower identifiers compare
/// as if zero-extended.
#[derive(Copy, Clone)]
pub struct Did {
    bytes: [u8; MAX_ID_BYTES],
    len: u8,
}

/// Result of testing a value against a pair of bounds.
/// `strict` holds when the value lies strictly inside the clockwise span from lower to upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsCheck {
    /// Inside the span, bounds excluded.
    pub strict: bool,
    /// Equal to the lower bound.
    pub on_lb: bool,
    /// Equal to the upper bound.
    pub on_ub: bool,
}

impl Did {
    fn check_width(width: usize) -> Result<usize> {
        if width == 0 || width % 8 != 0 || width / 8 > MAX_ID_BYTES {
            return Err(Error::InvalidIdentifierWidth(width));
        }
        Ok(width / 8)
    }

    /// The zero identifier of `width` bits.
    pub fn zero(width: usize) -> Result<Self> {
        let len = Self::check_width(width)?;
        Ok(Self {
            bytes: [0u8; MAX_ID_BYTES],
            len: len as u8,
        })
    }

    /// Build from big-endian bytes, the width is the length of the slice.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_ID_BYTES {
            return Err(Error::InvalidIdentifierFormat(format!(
                "{} bytes",
                data.len()
            )));
        }
        let mut bytes = [0u8; MAX_ID_BYTES];
        bytes[MAX_ID_BYTES - data.len()..].copy_from_slice(data);
        Ok(Self {
            bytes,
            len: data.len() as u8,
        })
    }

    /// Parse a base64 encoded big-endian byte sequence.
    pub fn from_base64(s: &str) -> Result<Self> {
        let data =
            base64::decode(s).map_err(|_| Error::InvalidIdentifierFormat(s.to_string()))?;
        Self::from_bytes(&data)
    }

    /// Reduce an unsigned integer modulo `2^width`.
    pub fn from_biguint(n: &BigUint, width: usize) -> Result<Self> {
        let len = Self::check_width(width)?;
        let modulus = BigUint::from(1u8) << width;
        let reduced = (n % modulus).to_bytes_be();
        let mut bytes = [0u8; MAX_ID_BYTES];
        bytes[MAX_ID_BYTES - reduced.len()..].copy_from_slice(&reduced);
        Ok(Self {
            bytes,
            len: len as u8,
        })
    }

    /// A random identifier of `width` bits.
    pub fn random(width: usize) -> Result<Self> {
        let len = Self::check_width(width)?;
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        Self::from_bytes(&data)
    }

    /// `2^k mod 2^width`.
    pub fn power_of_two(k: usize, width: usize) -> Result<Self> {
        let mut ret = Self::zero(width)?;
        if k < width {
            ret.bytes[MAX_ID_BYTES - 1 - k / 8] = 1 << (k % 8);
        }
        Ok(ret)
    }

    /// `self + 2^k`, wrapping at the width of self.
    pub fn offset_pow2(&self, k: usize) -> Self {
        let mut step = Self {
            bytes: [0u8; MAX_ID_BYTES],
            len: self.len,
        };
        if k < self.width() {
            step.bytes[MAX_ID_BYTES - 1 - k / 8] = 1 << (k % 8);
        }
        *self + step
    }

    /// Hash an application key into an identifier of `width` bits with SHA3.
    /// Widths without a matching SHA3 variant use a truncated SHA3-512 digest.
    pub fn hash_key(key: &[u8], width: usize) -> Result<Self> {
        let len = Self::check_width(width)?;
        let mut hasher = match width {
            224 => Sha3::v224(),
            256 => Sha3::v256(),
            384 => Sha3::v384(),
            _ => Sha3::v512(),
        };
        let mut digest = [0u8; 64];
        hasher.update(key);
        match width {
            224 => hasher.finalize(&mut digest[..28]),
            256 => hasher.finalize(&mut digest[..32]),
            384 => hasher.finalize(&mut digest[..48]),
            _ => hasher.finalize(&mut digest),
        }
        Self::from_bytes(&digest[..len])
    }

    /// Width in bits.
    pub fn width(&self) -> usize {
        self.len as usize * 8
    }

    /// The big-endian bytes, exactly `width / 8` long.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[MAX_ID_BYTES - self.len as usize..]
    }

    /// Test bit `k`, counting from the least significant bit.
    pub fn bit(&self, k: usize) -> bool {
        if k >= self.width() {
            return false;
        }
        self.bytes[MAX_ID_BYTES - 1 - k / 8] & (1 << (k % 8)) != 0
    }

    /// Shift left by one bit, dropping the top bit and shifting `bit` in at the bottom.
    pub fn left_shift_in(&self, bit: bool) -> Self {
        let mut ret = *self;
        let start = MAX_ID_BYTES - self.len as usize;
        let mut carry = bit as u8;
        for i in (start..MAX_ID_BYTES).rev() {
            let next = ret.bytes[i] >> 7;
            ret.bytes[i] = (ret.bytes[i] << 1) | carry;
            carry = next;
        }
        ret
    }

    /// Two's complement over the lowest `len` bytes.
    fn complement(&self, len: usize) -> Self {
        let mut ret = Self {
            bytes: [0u8; MAX_ID_BYTES],
            len: len as u8,
        };
        let start = MAX_ID_BYTES - len;
        let mut carry = 1u16;
        for i in (start..MAX_ID_BYTES).rev() {
            let v = (!self.bytes[i]) as u16 + carry;
            ret.bytes[i] = v as u8;
            carry = v >> 8;
        }
        ret
    }

    /// Test the value against lower bound `lb` and upper bound `ub`.
    pub fn bounds_checks(&self, lb: Did, ub: Did) -> BoundsCheck {
        let on_lb = *self == lb;
        let on_ub = *self == ub;
        let strict = if lb < ub {
            lb < *self && *self < ub
        } else {
            lb < *self || *self < ub
        };
        BoundsCheck {
            strict,
            on_lb,
            on_ub,
        }
    }

    /// Test x <- (lb, ub)
    pub fn in_open(&self, lb: Did, ub: Did) -> bool {
        let c = self.bounds_checks(lb, ub);
        c.strict && !(c.on_lb || c.on_ub)
    }

    /// Test x <- (lb, ub]
    pub fn in_left_open(&self, lb: Did, ub: Did) -> bool {
        let c = self.bounds_checks(lb, ub);
        c.strict || (c.on_ub && !c.on_lb)
    }

    /// Test x <- [lb, ub)
    pub fn in_right_open(&self, lb: Did, ub: Did) -> bool {
        let c = self.bounds_checks(lb, ub);
        c.strict || (c.on_lb && !c.on_ub)
    }

    /// Test x <- [lb, ub]
    pub fn in_closed(&self, lb: Did, ub: Did) -> bool {
        let c = self.bounds_checks(lb, ub);
        c.strict || c.on_lb || c.on_ub
    }
}

impl PartialEq for Did {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Did {}

impl PartialOrd for Did {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Did {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Hash for Did {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state)
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

impl std::fmt::Debug for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Did({self})")
    }
}

impl FromStr for Did {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let data = hex::decode(raw).map_err(|_| Error::InvalidIdentifierFormat(s.to_string()))?;
        Self::from_bytes(&data).map_err(|_| Error::InvalidIdentifierFormat(s.to_string()))
    }
}

impl From<Did> for BigUint {
    fn from(did: Did) -> BigUint {
        BigUint::from_bytes_be(did.as_bytes())
    }
}

impl Serialize for Did {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        Did::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// impl finite ring for Did
impl Add for Did {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let len = self.len.max(rhs.len) as usize;
        let mut ret = Self {
            bytes: [0u8; MAX_ID_BYTES],
            len: len as u8,
        };
        let mut carry = 0u16;
        for i in (MAX_ID_BYTES - len..MAX_ID_BYTES).rev() {
            let v = self.bytes[i] as u16 + rhs.bytes[i] as u16 + carry;
            ret.bytes[i] = v as u8;
            carry = v >> 8;
        }
        ret
    }
}

impl Neg for Did {
    type Output = Self;
    fn neg(self) -> Self {
        self.complement(self.len as usize)
    }
}

impl Sub for Did {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        let len = self.len.max(rhs.len) as usize;
        self + rhs.complement(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did(s: &str) -> Did {
        Did::from_str(s).unwrap()
    }

    #[test]
    fn test_compare_zero_extends() {
        let a = did("0x00ff");
        let b = did("0xff");
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(did("0x0100") > did("0xff"));
        assert_eq!(
            did("0x0100").cmp(&did("0xff")),
            did("0xff").cmp(&did("0x0100")).reverse()
        );
    }

    #[test]
    fn test_arithmetic_wraps() {
        let a = did("0xfffe");
        let one = did("0x0001");
        assert_eq!(a + one + one, did("0x0000"));
        assert_eq!(did("0x10") - did("0x01"), did("0x0f"));
        assert_eq!(did("0x01") - did("0x10"), did("0xf1"));
        for _ in 0..20 {
            let x = Did::random(224).unwrap();
            let y = Did::random(224).unwrap();
            assert_eq!(x + (-x), Did::zero(224).unwrap());
            assert_eq!(x - y + y, x);
            assert_eq!(x.cmp(&y), y.cmp(&x).reverse());
        }
    }

    #[test]
    fn test_mixed_width_add_truncates_to_wider() {
        let a = did("0xff");
        let b = did("0x00ff");
        let sum = a + b;
        assert_eq!(sum.width(), 16);
        assert_eq!(sum, did("0x01fe"));
    }

    #[test]
    fn test_power_of_two_advances() {
        let id = Did::random(224).unwrap();
        for k in [0, 1, 7, 8, 100, 223] {
            let step = Did::power_of_two(k, 224).unwrap();
            let expected = BigUint::from(id) + (BigUint::from(1u8) << k);
            assert_eq!(id + step, Did::from_biguint(&expected, 224).unwrap());
            assert_eq!((id + step) - id, step);
            assert_eq!(id.offset_pow2(k), id + step);
        }
        assert_eq!(
            Did::power_of_two(224, 224).unwrap(),
            Did::zero(224).unwrap()
        );
    }

    #[test]
    fn test_intervals() {
        let a = did("0x10");
        let b = did("0x80");
        let inside = did("0x40");
        let outside = did("0xa0");

        // c == a: only closed and right-open
        assert!(!a.in_open(a, b));
        assert!(!a.in_left_open(a, b));
        assert!(a.in_right_open(a, b));
        assert!(a.in_closed(a, b));

        // strictly inside: all four
        assert!(inside.in_open(a, b));
        assert!(inside.in_left_open(a, b));
        assert!(inside.in_right_open(a, b));
        assert!(inside.in_closed(a, b));

        // c == b: left-open and closed
        assert!(!b.in_open(a, b));
        assert!(b.in_left_open(a, b));
        assert!(!b.in_right_open(a, b));
        assert!(b.in_closed(a, b));

        assert!(!outside.in_closed(a, b));

        // wrapped interval (0x80, 0x10)
        assert!(outside.in_open(b, a));
        assert!(did("0x05").in_open(b, a));
        assert!(!inside.in_open(b, a));
    }

    #[test]
    fn test_coincident_bounds_span_the_ring() {
        let a = did("0x10");
        let x = did("0x99");
        assert!(x.in_open(a, a));
        assert!(x.in_left_open(a, a));
        assert!(!a.in_open(a, a));
        assert!(!a.in_left_open(a, a));
        assert!(!a.in_right_open(a, a));
        assert!(a.in_closed(a, a));
    }

    #[test]
    fn test_left_shift_in() {
        assert_eq!(did("0x80ff").left_shift_in(true), did("0x01ff"));
        assert_eq!(did("0x0001").left_shift_in(false), did("0x0002"));
        let x = did("0x4001");
        assert!(x.bit(0));
        assert!(x.bit(14));
        assert!(!x.bit(15));
    }

    #[test]
    fn test_parse() {
        assert_eq!(did("abcd"), did("0xabcd"));
        assert_eq!(did("0x0abc").to_string(), "0x0abc");
        assert_eq!(Did::from_base64("q80=").unwrap(), did("0xabcd"));
        assert!(matches!(
            Did::from_str("0xzz"),
            Err(Error::InvalidIdentifierFormat(_))
        ));
        assert!(matches!(
            Did::from_str(""),
            Err(Error::InvalidIdentifierFormat(_))
        ));
        assert!(matches!(
            Did::from_base64("***"),
            Err(Error::InvalidIdentifierFormat(_))
        ));
        assert!(Did::zero(12).is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let a = did("0x00ab");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"0x00ab\"");
        let b: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.width(), 16);
    }

    #[test]
    fn test_hash_key_width() {
        for width in [224, 256, 160, 512] {
            let h = Did::hash_key(b"hello", width).unwrap();
            assert_eq!(h.width(), width);
            assert_eq!(h, Did::hash_key(b"hello", width).unwrap());
        }
        assert_ne!(
            Did::hash_key(b"hello", 224).unwrap(),
            Did::hash_key(b"world", 224).unwrap()
        );
    }
}
