//! Typed attribute values and index key comparison.
//!
//! Keys travel as byte slices tagged with a [`TypeCode`]. Numbers are encoded
//! little-endian; strings are their raw bytes, optionally NUL-terminated.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{QueryError, Result};
use crate::types::TypeCode;

/// A decoded attribute or index key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl KeyValue {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Self::Int32(_) => TypeCode::Int32,
            Self::Uint32(_) => TypeCode::Uint32,
            Self::Int64(_) => TypeCode::Int64,
            Self::Uint64(_) => TypeCode::Uint64,
            Self::Float(_) => TypeCode::Float,
            Self::Double(_) => TypeCode::Double,
            Self::String(_) => TypeCode::String,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int32(value) => value.to_le_bytes().to_vec(),
            Self::Uint32(value) => value.to_le_bytes().to_vec(),
            Self::Int64(value) => value.to_le_bytes().to_vec(),
            Self::Uint64(value) => value.to_le_bytes().to_vec(),
            Self::Float(value) => value.to_le_bytes().to_vec(),
            Self::Double(value) => value.to_le_bytes().to_vec(),
            Self::String(value) => value.as_bytes().to_vec(),
        }
    }

    /// Decodes `bytes` as `type_code`; `None` if the size does not fit.
    pub fn from_bytes(type_code: TypeCode, bytes: &[u8]) -> Option<Self> {
        Some(match type_code {
            TypeCode::Int32 => Self::Int32(i32::from_le_bytes(fixed(bytes)?)),
            TypeCode::Uint32 => Self::Uint32(u32::from_le_bytes(fixed(bytes)?)),
            TypeCode::Int64 => Self::Int64(i64::from_le_bytes(fixed(bytes)?)),
            TypeCode::Uint64 => Self::Uint64(u64::from_le_bytes(fixed(bytes)?)),
            TypeCode::Float => Self::Float(f32::from_le_bytes(fixed(bytes)?)),
            TypeCode::Double => Self::Double(f64::from_le_bytes(fixed(bytes)?)),
            TypeCode::String | TypeCode::MimeString => {
                Self::String(String::from_utf8_lossy(trim_nul(bytes)).into_owned())
            }
            TypeCode::Other(_) => return None,
        })
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(value) => write!(f, "{value}"),
            Self::Uint32(value) => write!(f, "{value}"),
            Self::Int64(value) => write!(f, "{value}"),
            Self::Uint64(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

/// Cuts a string key at its first NUL byte.
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    match memchr::memchr(0, bytes) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

// ---------------------------------------------------------------------------
// Key comparison
// ---------------------------------------------------------------------------

/// Three-way comparison of two keys of the same type.
///
/// Keys too short for their type and unknown types compare as `Less`;
/// unordered floats (NaN) compare as `Equal`.
pub fn compare_keys(type_code: TypeCode, a: &[u8], b: &[u8]) -> Ordering {
    fn numeric<T: PartialOrd, const N: usize>(
        a: &[u8],
        b: &[u8],
        decode: fn([u8; N]) -> T,
    ) -> Ordering {
        match (fixed::<N>(a), fixed::<N>(b)) {
            (Some(a), Some(b)) => decode(a)
                .partial_cmp(&decode(b))
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Less,
        }
    }

    match type_code {
        TypeCode::Int32 => numeric(a, b, i32::from_le_bytes),
        TypeCode::Uint32 => numeric(a, b, u32::from_le_bytes),
        TypeCode::Int64 => numeric(a, b, i64::from_le_bytes),
        TypeCode::Uint64 => numeric(a, b, u64::from_le_bytes),
        TypeCode::Float => numeric(a, b, f32::from_le_bytes),
        TypeCode::Double => numeric(a, b, f64::from_le_bytes),
        TypeCode::String | TypeCode::MimeString => trim_nul(a).cmp(trim_nul(b)),
        TypeCode::Other(_) => Ordering::Less,
    }
}

// ---------------------------------------------------------------------------
// Literal conversion
// ---------------------------------------------------------------------------

/// Converts a query literal to a key of `type_code`.
///
/// Numbers are read like C's `strtol`/`strtoul`/`strtod`: the longest valid
/// prefix is used and anything after it is ignored. Strings are cut to
/// `max_length - 1` bytes.
pub fn convert_literal(type_code: TypeCode, literal: &str, max_length: usize) -> Result<Vec<u8>> {
    let bytes = match type_code {
        TypeCode::String | TypeCode::MimeString => {
            let limit = max_length.saturating_sub(1);
            let raw = literal.as_bytes();
            raw[..raw.len().min(limit)].to_vec()
        }
        TypeCode::Int32 => (parse_c_long(literal) as i32).to_le_bytes().to_vec(),
        TypeCode::Uint32 => (parse_c_ulong(literal) as u32).to_le_bytes().to_vec(),
        TypeCode::Int64 => parse_c_long(literal).to_le_bytes().to_vec(),
        TypeCode::Uint64 => parse_c_ulong(literal).to_le_bytes().to_vec(),
        TypeCode::Float => (parse_c_double(literal) as f32).to_le_bytes().to_vec(),
        TypeCode::Double => parse_c_double(literal).to_le_bytes().to_vec(),
        TypeCode::Other(_) => return Err(QueryError::UnsupportedType(type_code)),
    };
    Ok(bytes)
}

/// Splits off sign and radix the way `strtol` with base 0 does.
fn split_integer(text: &str) -> (bool, u32, &str) {
    let trimmed = text.trim_start();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let bytes = unsigned.as_bytes();
    if bytes.len() > 2
        && bytes[0] == b'0'
        && (bytes[1] == b'x' || bytes[1] == b'X')
        && bytes[2].is_ascii_hexdigit()
    {
        (negative, 16, &unsigned[2..])
    } else if bytes.len() > 1 && bytes[0] == b'0' {
        (negative, 8, &unsigned[1..])
    } else {
        (negative, 10, unsigned)
    }
}

fn accumulate_digits(digits: &str, radix: u32) -> (u128, bool) {
    let mut value: u128 = 0;
    let mut overflow = false;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(radix) else {
            break;
        };
        match value
            .checked_mul(u128::from(radix))
            .and_then(|v| v.checked_add(u128::from(digit)))
        {
            Some(next) if next <= u128::from(u64::MAX) => value = next,
            _ => {
                overflow = true;
                value = u128::from(u64::MAX);
                break;
            }
        }
    }
    (value, overflow)
}

/// `strtoll(text, NULL, 0)`: saturates on overflow, 0 when nothing parses.
pub fn parse_c_long(text: &str) -> i64 {
    let (negative, radix, digits) = split_integer(text);
    let (magnitude, _) = accumulate_digits(digits, radix);
    if negative {
        if magnitude > i64::MAX as u128 + 1 {
            i64::MIN
        } else {
            (magnitude as i128).wrapping_neg() as i64
        }
    } else {
        i64::try_from(magnitude).unwrap_or(i64::MAX)
    }
}

/// `strtoull(text, NULL, 0)`: a leading minus negates in unsigned arithmetic.
pub fn parse_c_ulong(text: &str) -> u64 {
    let (negative, radix, digits) = split_integer(text);
    let (magnitude, overflow) = accumulate_digits(digits, radix);
    if overflow {
        return u64::MAX;
    }
    let magnitude = magnitude as u64;
    if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    }
}

/// `strtod(text, NULL)` restricted to decimal notation plus `inf`/`nan`.
pub fn parse_c_double(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0usize;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let rest = trimmed[end..].to_ascii_lowercase();
    for special in ["infinity", "inf", "nan"] {
        if rest.starts_with(special) {
            return trimmed[..end + special.len()].parse().unwrap_or(0.0);
        }
    }

    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &trimmed[digits_start..end] == "." {
        return 0.0;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exponent_end = end + 1;
        if matches!(bytes.get(exponent_end), Some(b'+' | b'-')) {
            exponent_end += 1;
        }
        let exponent_digits = exponent_end;
        while exponent_end < bytes.len() && bytes[exponent_end].is_ascii_digit() {
            exponent_end += 1;
        }
        if exponent_end > exponent_digits {
            end = exponent_end;
        }
    }

    trimmed[..end].parse().unwrap_or(0.0)
}
