//! A complete in-memory back end for the query engine.
//!
//! [`MemoryVolume`] keeps nodes, directory entries, and ordered attribute
//! indexes behind one lock and implements [`crate::Context`], so queries can
//! run against it directly. Notifications are collected by a
//! [`RecordingNotifier`].

mod index;
mod notify;
mod volume;

pub use index::{MemoryIndex, MemoryIndexIterator};
pub use notify::RecordingNotifier;
pub use volume::{AttributeValue, MemoryEntry, MemoryNode, MemoryVolume, ROOT_NODE};
