//! Capabilities the query engine consumes from a storage back end.
//!
//! A back end implements [`Context`] and names its entry, node, index, and
//! iterator types through the associated types. The engine is generic over
//! the context and never touches storage any other way.

use std::borrow::Cow;

use crate::error::Result;
use crate::types::{Listener, NodeId, TypeCode, VolumeId};

/// The volume a query runs against.
pub trait Context {
    type Entry: Entry<Node = Self::Node>;
    type Node: Node<Entry = Self::Entry>;
    type Index: Index<Iterator = Self::Iterator>;
    type Iterator: IndexIterator<Context = Self, Entry = Self::Entry>;

    fn volume_id(&self) -> VolumeId;

    /// Creates an unset index handle for this volume.
    fn open_index(&self) -> Self::Index;

    /// Where live query notifications are delivered.
    fn notifier(&self) -> &dyn QueryNotifier;
}

/// A handle that can be pointed at one attribute index at a time.
pub trait Index {
    type Iterator: IndexIterator;

    /// Points the handle at the index of `attribute`.
    ///
    /// Fails with `EntryNotFound` when the attribute has no index.
    fn set_to(&mut self, attribute: &str) -> Result<()>;

    fn unset(&mut self);

    /// Key type of the current index.
    fn type_code(&self) -> TypeCode;

    /// Fixed key size of the current index, 0 for variable-length strings.
    fn key_size(&self) -> usize;

    /// Scales a base score by how selective the current index is.
    fn weighted_score(&self, score: i32) -> i32;

    fn create_iterator(&self) -> Result<Self::Iterator>;
}

/// Ordered cursor over the (key, entry) pairs of one index.
pub trait IndexIterator {
    type Context: ?Sized;
    type Entry;

    /// Positions the cursor before the first key not less than `key`.
    ///
    /// Returns `EntryNotFound` if no key equals `key`; the cursor is
    /// positioned either way.
    fn find(&mut self, key: &[u8]) -> Result<()>;

    /// Advances to the next pair, writing its key into `key`.
    ///
    /// Returns the number of entries sharing that key, or `None` once the
    /// index is exhausted.
    fn fetch_next_entry(&mut self, key: &mut Vec<u8>) -> Result<Option<usize>>;

    /// Moves past the remaining entries that share the current key.
    fn skip_duplicates(&mut self);

    /// Resolves the entry at the current position.
    fn get_entry(&mut self, context: &Self::Context) -> Result<Self::Entry>;

    /// Called after each `get_next_entry` so the back end can drop locks or
    /// cached positions until the next call.
    fn suspend(&mut self);

    fn resume(&mut self);
}

/// A directory entry: a name for a node inside a parent directory.
pub trait Entry {
    type Node;

    fn node(&self) -> Self::Node;

    fn node_id(&self) -> NodeId;

    fn parent_id(&self) -> NodeId;

    /// The entry name; `None` if it cannot be read.
    fn name(&self) -> Option<Cow<'_, str>>;
}

/// A file system node with metadata and attributes.
pub trait Node {
    type Entry;

    fn id(&self) -> NodeId;

    fn size(&self) -> i64;

    fn last_modified(&self) -> i64;

    /// Reads the attribute `name`, returning its type and raw value.
    fn attribute(&self, name: &str) -> Option<(TypeCode, Cow<'_, [u8]>)>;

    /// All entries referring to this node (hard links).
    fn referrers(&self) -> Vec<Self::Entry>;
}

/// Sink for live query notifications.
pub trait QueryNotifier {
    fn entry_created(
        &self,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    );

    fn entry_removed(
        &self,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    );

    fn attribute_changed(
        &self,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    );
}
