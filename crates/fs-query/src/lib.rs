//! Attribute queries over indexed volumes.
//!
//! This crate provides a query engine for file systems that keep ordered
//! attribute indexes:
//! - A query language of `attribute op value` equations joined by `&&`/`||`,
//!   with `!( ... )` negation and `*`/`?`/`[...]` wildcard patterns
//! - Score-based planning that picks the most selective index per branch
//! - Enumeration of matching directory entries, resumable between calls
//! - Live updates that report entries joining or leaving an open query
//!
//! Storage is abstracted by the traits in [`policy`]. The [`memory`] module
//! implements them in memory.

pub mod config;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod policy;
pub mod query;
pub mod types;
pub mod value;

// Re-export main types
pub use config::QueryLimits;
pub use error::{QueryError, Result};
pub use memory::MemoryVolume;
pub use pattern::PatternError;
pub use policy::{Context, Entry, Index, IndexIterator, Node, QueryNotifier};
pub use query::{Expression, Query};
pub use types::{
    Dirent, Listener, MatchResult, NodeId, NotificationKind, QueryFlags, QueryNotification,
    TypeCode, VolumeId,
};
pub use value::KeyValue;
