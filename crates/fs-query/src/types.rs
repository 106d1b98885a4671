//! Shared value types for queries, results, and notifications.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Inode number of a node or directory.
pub type NodeId = u64;

/// Identifier of the volume a query runs on.
pub type VolumeId = i32;

/// Attribute/index value type, using the BeOS four-character type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
    String,
    MimeString,
    /// Any other code; queries cannot convert values to it.
    Other(u32),
}

impl TypeCode {
    pub const INT32_RAW: u32 = u32::from_be_bytes(*b"LONG");
    pub const UINT32_RAW: u32 = u32::from_be_bytes(*b"ULNG");
    pub const INT64_RAW: u32 = u32::from_be_bytes(*b"LLNG");
    pub const UINT64_RAW: u32 = u32::from_be_bytes(*b"ULLG");
    pub const FLOAT_RAW: u32 = u32::from_be_bytes(*b"FLOT");
    pub const DOUBLE_RAW: u32 = u32::from_be_bytes(*b"DBLE");
    pub const STRING_RAW: u32 = u32::from_be_bytes(*b"CSTR");
    pub const MIME_STRING_RAW: u32 = u32::from_be_bytes(*b"MIMS");

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            Self::INT32_RAW => Self::Int32,
            Self::UINT32_RAW => Self::Uint32,
            Self::INT64_RAW => Self::Int64,
            Self::UINT64_RAW => Self::Uint64,
            Self::FLOAT_RAW => Self::Float,
            Self::DOUBLE_RAW => Self::Double,
            Self::STRING_RAW => Self::String,
            Self::MIME_STRING_RAW => Self::MimeString,
            other => Self::Other(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::Int32 => Self::INT32_RAW,
            Self::Uint32 => Self::UINT32_RAW,
            Self::Int64 => Self::INT64_RAW,
            Self::Uint64 => Self::UINT64_RAW,
            Self::Float => Self::FLOAT_RAW,
            Self::Double => Self::DOUBLE_RAW,
            Self::String => Self::STRING_RAW,
            Self::MimeString => Self::MIME_STRING_RAW,
            Self::Other(raw) => raw,
        }
    }

    /// Size of a key of this type, or `None` for variable-length strings.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Int32 | Self::Uint32 | Self::Float => Some(4),
            Self::Int64 | Self::Uint64 | Self::Double => Some(8),
            Self::String | Self::MimeString | Self::Other(_) => None,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::String | Self::MimeString)
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.as_raw().to_be_bytes();
        if bytes.iter().all(u8::is_ascii_graphic) {
            write!(f, "'{}'", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "{:#x}", self.as_raw())
        }
    }
}

bitflags! {
    /// Query open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlags: u32 {
        /// Keep the query open and report membership changes.
        const LIVE_QUERY = 0x0000_0001;
        /// Scan the full name index for equations without their own index.
        const QUERY_NON_INDEXED = 0x0000_0002;
        /// Also report attribute changes of entries that stay in the query.
        const ATTR_CHANGE_NOTIFICATION = 0x0000_0004;
    }
}

/// Outcome of evaluating a term against an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    NotMatched,
}

impl MatchResult {
    pub fn from_bool(matched: bool) -> Self {
        if matched {
            Self::Matched
        } else {
            Self::NotMatched
        }
    }

    pub fn is_match(self) -> bool {
        self == Self::Matched
    }
}

/// Offset of `d_name` inside a `struct dirent`.
pub const DIRENT_NAME_OFFSET: usize = 26;

/// `sizeof(struct dirent)`, the base of the record length.
pub const DIRENT_SIZE: usize = 32;

/// One directory entry produced by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dirent {
    pub dev: VolumeId,
    pub pdev: VolumeId,
    pub ino: NodeId,
    pub pino: NodeId,
    pub reclen: u16,
    pub name: String,
}

impl Dirent {
    /// Bytes a dirent with `name` needs in a caller buffer, including the NUL.
    pub fn required_size(name: &str) -> usize {
        DIRENT_NAME_OFFSET + name.len() + 1
    }
}

/// Receiver of live query notifications (port and token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub port: i32,
    pub token: u32,
}

impl Listener {
    pub fn new(port: i32, token: u32) -> Self {
        Self { port, token }
    }

    /// Negative ports never receive anything.
    pub fn is_valid(&self) -> bool {
        self.port >= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EntryCreated,
    EntryRemoved,
    AttributeChanged,
}

/// A live query notification as delivered to a [`crate::QueryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNotification {
    pub kind: NotificationKind,
    pub listener: Listener,
    pub volume: VolumeId,
    pub parent: NodeId,
    pub name: String,
    pub node: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip_through_raw() {
        for code in [
            TypeCode::Int32,
            TypeCode::Uint64,
            TypeCode::Double,
            TypeCode::String,
            TypeCode::MimeString,
        ] {
            assert_eq!(TypeCode::from_raw(code.as_raw()), code);
        }
        assert_eq!(TypeCode::from_raw(7), TypeCode::Other(7));
    }

    #[test]
    fn type_code_display_uses_four_chars() {
        assert_eq!(TypeCode::String.to_string(), "'CSTR'");
        assert_eq!(TypeCode::Other(3).to_string(), "0x3");
    }

    #[test]
    fn dirent_size_includes_terminator() {
        assert_eq!(Dirent::required_size("a.txt"), DIRENT_NAME_OFFSET + 6);
    }

    #[test]
    fn negative_port_listener_is_invalid() {
        assert!(!Listener::new(-1, 0).is_valid());
        assert!(Listener::new(0, 0).is_valid());
    }
}
