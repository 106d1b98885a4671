//! In-memory volume: nodes, directory entries, and their indexes.

use std::borrow::Cow;
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::RwLock;
use thin_vec::ThinVec;

use crate::error::{QueryError, Result};
use crate::policy::{Context, Entry, Node, QueryNotifier};
use crate::types::{NodeId, QueryNotification, TypeCode, VolumeId};
use crate::value::KeyValue;

use super::index::{IndexRecord, IndexSlot, MemoryIndex, MemoryIndexIterator};
use super::notify::RecordingNotifier;

/// Id of the root directory every volume starts with.
pub const ROOT_NODE: NodeId = 1;

pub(crate) type SharedState = Arc<RwLock<VolumeState>>;

/// An attribute value as stored on a node.
pub type AttributeValue = (TypeCode, Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryKey {
    parent: NodeId,
    name: String,
}

#[derive(Debug, Default)]
struct NodeRecord {
    size: i64,
    last_modified: i64,
    attributes: FnvHashMap<String, AttributeValue>,
    referrers: ThinVec<EntryKey>,
}

#[derive(Debug)]
pub(crate) struct VolumeState {
    next_id: NodeId,
    nodes: FnvHashMap<NodeId, NodeRecord>,
    entries: FnvHashMap<EntryKey, NodeId>,
    pub(crate) indexes: FnvHashMap<String, IndexRecord>,
}

impl VolumeState {
    fn node(&self, id: NodeId) -> Result<&NodeRecord> {
        self.nodes
            .get(&id)
            .ok_or_else(|| QueryError::BadValue(format!("no node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeRecord> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| QueryError::BadValue(format!("no node {id}")))
    }

    /// Number of entries referring to `id`; 0 for unknown nodes.
    pub(crate) fn referrer_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |node| node.referrers.len())
    }

    /// Number of entries reachable through `slots`, hard links included.
    pub(crate) fn entries_under(&self, slots: &[IndexSlot]) -> usize {
        slots
            .iter()
            .map(|slot| match slot {
                IndexSlot::Entry { .. } => 1,
                IndexSlot::Node(id) => self.referrer_count(*id),
            })
            .sum()
    }

    fn index_entry(&mut self, key: &EntryKey) {
        if let Some(index) = self.indexes.get_mut("name") {
            index.insert(key.name.as_bytes(), entry_slot(key));
        }
    }

    fn unindex_entry(&mut self, key: &EntryKey) {
        if let Some(index) = self.indexes.get_mut("name") {
            index.remove(key.name.as_bytes(), &entry_slot(key));
        }
    }

    /// Adds `id` to the index of `attribute` if the index holds that type.
    fn index_value(&mut self, attribute: &str, id: NodeId, value: &AttributeValue) {
        if let Some(index) = self.indexes.get_mut(attribute) {
            if index.type_code() == value.0 {
                index.insert(&value.1, IndexSlot::Node(id));
            }
        }
    }

    fn unindex_value(&mut self, attribute: &str, id: NodeId, value: &AttributeValue) {
        if let Some(index) = self.indexes.get_mut(attribute) {
            index.remove(&value.1, &IndexSlot::Node(id));
        }
    }

    /// The value of `attribute` the way indexes see it, virtual ones included.
    fn indexed_value(record: &NodeRecord, attribute: &str) -> Option<AttributeValue> {
        match attribute {
            "size" => Some((TypeCode::Int64, record.size.to_le_bytes().to_vec())),
            "last_modified" => Some((TypeCode::Int64, record.last_modified.to_le_bytes().to_vec())),
            other => record.attributes.get(other).cloned(),
        }
    }
}

fn entry_slot(key: &EntryKey) -> IndexSlot {
    IndexSlot::Entry {
        parent: key.parent,
        name: key.name.clone(),
    }
}

fn is_virtual(attribute: &str) -> bool {
    matches!(attribute, "name" | "size" | "last_modified")
}

/// A volume held entirely in memory.
///
/// All methods take `&self`; state lives behind a shared lock so entries,
/// nodes, and iterators handed out to queries stay valid while the volume
/// changes.
#[derive(Debug)]
pub struct MemoryVolume {
    id: VolumeId,
    state: SharedState,
    notifier: RecordingNotifier,
}

impl MemoryVolume {
    /// Creates a volume with a root directory and a `name` index.
    pub fn new(id: VolumeId) -> Self {
        let mut nodes = FnvHashMap::default();
        nodes.insert(ROOT_NODE, NodeRecord::default());
        let mut indexes = FnvHashMap::default();
        indexes.insert("name".to_string(), IndexRecord::new(TypeCode::String));

        Self {
            id,
            state: Arc::new(RwLock::new(VolumeState {
                next_id: ROOT_NODE + 1,
                nodes,
                entries: FnvHashMap::default(),
                indexes,
            })),
            notifier: RecordingNotifier::default(),
        }
    }

    /// Creates an index over `attribute` and fills it from existing data.
    ///
    /// `name` must be a string index; `size` and `last_modified` are `Int64`.
    pub fn create_index(&self, attribute: &str, type_code: TypeCode) -> Result<()> {
        let expected = match attribute {
            "name" => Some(TypeCode::String),
            "size" | "last_modified" => Some(TypeCode::Int64),
            _ => None,
        };
        if expected.is_some_and(|expected| expected != type_code) {
            return Err(QueryError::BadValue(format!(
                "{attribute} cannot be indexed as {type_code}"
            )));
        }

        let mut state = self.state.write();
        if state.indexes.contains_key(attribute) {
            return Err(QueryError::BadValue(format!("index {attribute} already exists")));
        }

        let mut record = IndexRecord::new(type_code);
        if attribute == "name" {
            for key in state.entries.keys() {
                record.insert(key.name.as_bytes(), entry_slot(key));
            }
        } else {
            for (id, node) in &state.nodes {
                if let Some((value_type, value)) = VolumeState::indexed_value(node, attribute) {
                    if value_type == type_code {
                        record.insert(&value, IndexSlot::Node(*id));
                    }
                }
            }
        }
        log::debug!("created index {attribute} with {} entries", record.len());
        state.indexes.insert(attribute.to_string(), record);
        Ok(())
    }

    /// Drops the index over `attribute`; returns whether it existed.
    pub fn remove_index(&self, attribute: &str) -> bool {
        self.state.write().indexes.remove(attribute).is_some()
    }

    pub fn create_node(&self) -> NodeId {
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;
        let record = NodeRecord::default();
        for attribute in ["size", "last_modified"] {
            if let Some(value) = VolumeState::indexed_value(&record, attribute) {
                state.index_value(attribute, id, &value);
            }
        }
        state.nodes.insert(id, record);
        id
    }

    /// Adds the entry `name` for `node` inside the directory `parent`.
    pub fn link(&self, parent: NodeId, name: &str, node: NodeId) -> Result<MemoryEntry> {
        if name.is_empty() || name.contains('/') {
            return Err(QueryError::BadValue(format!("invalid entry name {name:?}")));
        }

        let mut state = self.state.write();
        state.node(parent)?;
        state.node(node)?;
        let key = EntryKey {
            parent,
            name: name.to_string(),
        };
        if state.entries.contains_key(&key) {
            return Err(QueryError::BadValue(format!("{name:?} already exists in {parent}")));
        }

        state.entries.insert(key.clone(), node);
        state.index_entry(&key);
        state.node_mut(node)?.referrers.push(key);
        drop(state);

        Ok(self.make_entry(parent, name, node))
    }

    /// Removes an entry. A node whose last entry goes away is deleted.
    pub fn unlink(&self, parent: NodeId, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let key = EntryKey {
            parent,
            name: name.to_string(),
        };
        let node = state
            .entries
            .remove(&key)
            .ok_or_else(|| QueryError::BadValue(format!("no entry {name:?} in {parent}")))?;
        state.unindex_entry(&key);

        let record = state.node_mut(node)?;
        record.referrers.retain(|referrer| *referrer != key);
        if !record.referrers.is_empty() || node == ROOT_NODE {
            return Ok(());
        }

        if let Some(record) = state.nodes.remove(&node) {
            for attribute in ["size", "last_modified"] {
                if let Some(value) = VolumeState::indexed_value(&record, attribute) {
                    state.unindex_value(attribute, node, &value);
                }
            }
            for (attribute, value) in &record.attributes {
                state.unindex_value(attribute, node, value);
            }
        }
        Ok(())
    }

    /// Moves an entry, possibly to another directory.
    pub fn rename(
        &self,
        old_parent: NodeId,
        old_name: &str,
        new_parent: NodeId,
        new_name: &str,
    ) -> Result<MemoryEntry> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(QueryError::BadValue(format!("invalid entry name {new_name:?}")));
        }

        let mut state = self.state.write();
        state.node(new_parent)?;
        let old_key = EntryKey {
            parent: old_parent,
            name: old_name.to_string(),
        };
        let new_key = EntryKey {
            parent: new_parent,
            name: new_name.to_string(),
        };
        if state.entries.contains_key(&new_key) {
            return Err(QueryError::BadValue(format!(
                "{new_name:?} already exists in {new_parent}"
            )));
        }
        let node = state
            .entries
            .remove(&old_key)
            .ok_or_else(|| QueryError::BadValue(format!("no entry {old_name:?} in {old_parent}")))?;

        state.unindex_entry(&old_key);
        state.entries.insert(new_key.clone(), node);
        state.index_entry(&new_key);
        let record = state.node_mut(node)?;
        for referrer in record.referrers.iter_mut() {
            if *referrer == old_key {
                *referrer = new_key.clone();
            }
        }
        drop(state);

        Ok(self.make_entry(new_parent, new_name, node))
    }

    /// Stores an attribute and returns its previous value.
    ///
    /// Fixed-size types must be given exactly their key size.
    pub fn write_attribute(
        &self,
        node: NodeId,
        attribute: &str,
        type_code: TypeCode,
        value: &[u8],
    ) -> Result<Option<AttributeValue>> {
        if is_virtual(attribute) {
            return Err(QueryError::BadValue(format!("{attribute} cannot be written")));
        }
        if let TypeCode::Other(_) = type_code {
            return Err(QueryError::UnsupportedType(type_code));
        }
        if type_code.fixed_size().is_some_and(|size| size != value.len()) {
            return Err(QueryError::BadValue(format!(
                "{} bytes are not a {type_code} value",
                value.len()
            )));
        }

        let mut state = self.state.write();
        let new_value = (type_code, value.to_vec());
        let old = state
            .node_mut(node)?
            .attributes
            .insert(attribute.to_string(), new_value.clone());
        if let Some(old) = &old {
            state.unindex_value(attribute, node, old);
        }
        state.index_value(attribute, node, &new_value);
        Ok(old)
    }

    /// Stores a decoded value; see [`MemoryVolume::write_attribute`].
    pub fn write_value(
        &self,
        node: NodeId,
        attribute: &str,
        value: &KeyValue,
    ) -> Result<Option<AttributeValue>> {
        self.write_attribute(node, attribute, value.type_code(), &value.to_bytes())
    }

    /// Deletes an attribute and returns the value it had.
    pub fn remove_attribute(&self, node: NodeId, attribute: &str) -> Result<Option<AttributeValue>> {
        let mut state = self.state.write();
        let old = state.node_mut(node)?.attributes.remove(attribute);
        if let Some(old) = &old {
            state.unindex_value(attribute, node, old);
        }
        Ok(old)
    }

    /// Sets the node size and returns the previous one.
    pub fn set_size(&self, node: NodeId, size: i64) -> Result<i64> {
        self.update_virtual(node, "size", size)
    }

    /// Sets the modification time and returns the previous one.
    pub fn set_last_modified(&self, node: NodeId, time: i64) -> Result<i64> {
        self.update_virtual(node, "last_modified", time)
    }

    fn update_virtual(&self, node: NodeId, attribute: &str, value: i64) -> Result<i64> {
        let mut state = self.state.write();
        let record = state.node_mut(node)?;
        let slot = if attribute == "size" {
            &mut record.size
        } else {
            &mut record.last_modified
        };
        let old = std::mem::replace(slot, value);

        let old_key = (TypeCode::Int64, old.to_le_bytes().to_vec());
        let new_key = (TypeCode::Int64, value.to_le_bytes().to_vec());
        state.unindex_value(attribute, node, &old_key);
        state.index_value(attribute, node, &new_key);
        Ok(old)
    }

    pub fn node(&self, id: NodeId) -> Option<MemoryNode> {
        self.state.read().nodes.contains_key(&id).then(|| MemoryNode {
            state: self.state.clone(),
            id,
        })
    }

    pub fn entry(&self, parent: NodeId, name: &str) -> Option<MemoryEntry> {
        let state = self.state.read();
        let key = EntryKey {
            parent,
            name: name.to_string(),
        };
        let node = *state.entries.get(&key)?;
        drop(state);
        Some(self.make_entry(parent, name, node))
    }

    /// Every entry of the volume, in no particular order.
    pub fn entries(&self) -> Vec<MemoryEntry> {
        let keys: Vec<(EntryKey, NodeId)> = self
            .state
            .read()
            .entries
            .iter()
            .map(|(key, node)| (key.clone(), *node))
            .collect();
        keys.into_iter()
            .map(|(key, node)| self.make_entry(key.parent, &key.name, node))
            .collect()
    }

    /// Drains the notifications delivered to this volume's notifier.
    pub fn take_notifications(&self) -> Vec<QueryNotification> {
        self.notifier.take()
    }

    fn make_entry(&self, parent: NodeId, name: &str, node: NodeId) -> MemoryEntry {
        MemoryEntry {
            state: self.state.clone(),
            parent,
            name: name.to_string(),
            node,
        }
    }
}

impl Context for MemoryVolume {
    type Entry = MemoryEntry;
    type Node = MemoryNode;
    type Index = MemoryIndex;
    type Iterator = MemoryIndexIterator;

    fn volume_id(&self) -> VolumeId {
        self.id
    }

    fn open_index(&self) -> MemoryIndex {
        MemoryIndex::new(self.state.clone())
    }

    fn notifier(&self) -> &dyn QueryNotifier {
        &self.notifier
    }
}

// ---------------------------------------------------------------------------
// Entries and nodes
// ---------------------------------------------------------------------------

/// A directory entry of a [`MemoryVolume`].
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    state: SharedState,
    parent: NodeId,
    name: String,
    node: NodeId,
}

impl Entry for MemoryEntry {
    type Node = MemoryNode;

    fn node(&self) -> MemoryNode {
        MemoryNode {
            state: self.state.clone(),
            id: self.node,
        }
    }

    fn node_id(&self) -> NodeId {
        self.node
    }

    fn parent_id(&self) -> NodeId {
        self.parent
    }

    fn name(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(&self.name))
    }
}

/// A node of a [`MemoryVolume`]; reads go to the live volume state.
#[derive(Debug, Clone)]
pub struct MemoryNode {
    state: SharedState,
    id: NodeId,
}

impl Node for MemoryNode {
    type Entry = MemoryEntry;

    fn id(&self) -> NodeId {
        self.id
    }

    fn size(&self) -> i64 {
        self.state.read().nodes.get(&self.id).map_or(0, |node| node.size)
    }

    fn last_modified(&self) -> i64 {
        self.state
            .read()
            .nodes
            .get(&self.id)
            .map_or(0, |node| node.last_modified)
    }

    fn attribute(&self, name: &str) -> Option<(TypeCode, Cow<'_, [u8]>)> {
        let state = self.state.read();
        let (type_code, value) = state.nodes.get(&self.id)?.attributes.get(name)?;
        Some((*type_code, Cow::Owned(value.clone())))
    }

    fn referrers(&self) -> Vec<MemoryEntry> {
        let state = self.state.read();
        let Some(node) = state.nodes.get(&self.id) else {
            return Vec::new();
        };
        node.referrers
            .iter()
            .map(|key| MemoryEntry {
                state: self.state.clone(),
                parent: key.parent,
                name: key.name.clone(),
                node: self.id,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Index, IndexIterator};

    fn collect(volume: &MemoryVolume, attribute: &str) -> Vec<(Vec<u8>, String)> {
        let mut index = volume.open_index();
        index.set_to(attribute).unwrap();
        let mut iterator = index.create_iterator().unwrap();
        let mut key = Vec::new();
        let mut found = Vec::new();
        while iterator.fetch_next_entry(&mut key).unwrap().is_some() {
            let entry = iterator.get_entry(volume).unwrap();
            found.push((key.clone(), entry.name().unwrap().into_owned()));
        }
        found
    }

    #[test]
    fn name_index_tracks_links_and_renames() {
        let volume = MemoryVolume::new(3);
        let node = volume.create_node();
        volume.link(ROOT_NODE, "b.txt", node).unwrap();
        let other = volume.create_node();
        volume.link(ROOT_NODE, "a.txt", other).unwrap();

        let names: Vec<String> = collect(&volume, "name").into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        volume.rename(ROOT_NODE, "b.txt", ROOT_NODE, "0.txt").unwrap();
        let names: Vec<String> = collect(&volume, "name").into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["0.txt", "a.txt"]);
        assert!(volume.entry(ROOT_NODE, "b.txt").is_none());
    }

    #[test]
    fn attribute_index_follows_writes() {
        let volume = MemoryVolume::new(3);
        volume.create_index("rating", TypeCode::Int32).unwrap();
        let node = volume.create_node();
        volume.link(ROOT_NODE, "song", node).unwrap();

        assert!(volume
            .write_attribute(node, "rating", TypeCode::Int32, &3i32.to_le_bytes())
            .unwrap()
            .is_none());
        let old = volume
            .write_attribute(node, "rating", TypeCode::Int32, &5i32.to_le_bytes())
            .unwrap();
        assert_eq!(old, Some((TypeCode::Int32, 3i32.to_le_bytes().to_vec())));
        assert_eq!(
            collect(&volume, "rating"),
            vec![(5i32.to_le_bytes().to_vec(), "song".to_string())]
        );

        volume.remove_attribute(node, "rating").unwrap();
        assert!(collect(&volume, "rating").is_empty());
    }

    #[test]
    fn mistyped_values_are_rejected() {
        let volume = MemoryVolume::new(3);
        let node = volume.create_node();
        assert!(volume
            .write_attribute(node, "rating", TypeCode::Int32, &[1, 2])
            .is_err());
        assert!(volume
            .write_attribute(node, "name", TypeCode::String, b"x")
            .is_err());
        assert!(volume.create_index("size", TypeCode::Int32).is_err());
    }

    #[test]
    fn virtual_indexes_follow_setters() {
        let volume = MemoryVolume::new(3);
        let node = volume.create_node();
        volume.link(ROOT_NODE, "big", node).unwrap();
        volume.set_size(node, 10).unwrap();
        volume.create_index("size", TypeCode::Int64).unwrap();
        assert_eq!(volume.set_size(node, 4096).unwrap(), 10);
        assert_eq!(
            collect(&volume, "size"),
            vec![(4096i64.to_le_bytes().to_vec(), "big".to_string())]
        );
    }

    #[test]
    fn unlinking_last_entry_removes_node() {
        let volume = MemoryVolume::new(3);
        volume.create_index("size", TypeCode::Int64).unwrap();
        let node = volume.create_node();
        volume.link(ROOT_NODE, "one", node).unwrap();
        volume.link(ROOT_NODE, "two", node).unwrap();
        assert_eq!(volume.node(node).unwrap().referrers().len(), 2);

        volume.unlink(ROOT_NODE, "one").unwrap();
        assert!(volume.node(node).is_some());
        volume.unlink(ROOT_NODE, "two").unwrap();
        assert!(volume.node(node).is_none());
        assert!(collect(&volume, "size").is_empty());
        assert!(collect(&volume, "name").is_empty());
    }

    #[test]
    fn nodes_created_after_index_are_indexed() {
        let volume = MemoryVolume::new(3);
        volume.create_index("size", TypeCode::Int64).unwrap();
        volume.create_index("last_modified", TypeCode::Int64).unwrap();
        let node = volume.create_node();
        volume.link(ROOT_NODE, "empty", node).unwrap();

        let zero = 0i64.to_le_bytes().to_vec();
        assert_eq!(collect(&volume, "size"), vec![(zero.clone(), "empty".to_string())]);
        assert_eq!(collect(&volume, "last_modified"), vec![(zero, "empty".to_string())]);
    }

    #[test]
    fn hard_links_are_each_returned_by_node_indexes() {
        let volume = MemoryVolume::new(3);
        volume.create_index("rating", TypeCode::Int32).unwrap();
        let node = volume.create_node();
        volume.link(ROOT_NODE, "a", node).unwrap();
        volume.link(ROOT_NODE, "b", node).unwrap();
        let single = volume.create_node();
        volume.link(ROOT_NODE, "c", single).unwrap();
        for id in [node, single] {
            volume
                .write_attribute(id, "rating", TypeCode::Int32, &5i32.to_le_bytes())
                .unwrap();
        }

        let mut index = volume.open_index();
        index.set_to("rating").unwrap();
        let mut iterator = index.create_iterator().unwrap();
        let mut key = Vec::new();
        let mut found = Vec::new();
        while let Some(duplicates) = iterator.fetch_next_entry(&mut key).unwrap() {
            let entry = iterator.get_entry(&volume).unwrap();
            found.push((entry.name().unwrap().into_owned(), duplicates));
        }
        found.sort();
        assert_eq!(
            found,
            vec![("a".to_string(), 3), ("b".to_string(), 3), ("c".to_string(), 3)]
        );
    }

    #[test]
    fn skipping_duplicates_passes_remaining_links() {
        let volume = MemoryVolume::new(3);
        volume.create_index("size", TypeCode::Int64).unwrap();
        let node = volume.create_node();
        volume.link(ROOT_NODE, "one", node).unwrap();
        volume.link(ROOT_NODE, "two", node).unwrap();
        let big = volume.create_node();
        volume.link(ROOT_NODE, "big", big).unwrap();
        volume.set_size(big, 100).unwrap();

        let mut index = volume.open_index();
        index.set_to("size").unwrap();
        let mut iterator = index.create_iterator().unwrap();
        let mut key = Vec::new();
        assert_eq!(iterator.fetch_next_entry(&mut key).unwrap(), Some(2));
        iterator.skip_duplicates();
        assert_eq!(iterator.fetch_next_entry(&mut key).unwrap(), Some(1));
        assert_eq!(key, 100i64.to_le_bytes().to_vec());
        assert_eq!(iterator.get_entry(&volume).unwrap().name().unwrap(), "big");
        assert_eq!(iterator.fetch_next_entry(&mut key).unwrap(), None);
    }

    #[test]
    fn weighted_score_prefers_small_indexes() {
        let volume = MemoryVolume::new(3);
        let mut index = volume.open_index();
        index.set_to("name").unwrap();
        assert_eq!(index.weighted_score(5), 5 * 1024);
        assert_eq!(index.weighted_score(0), 0);
    }

    #[test]
    fn iterator_refuses_work_while_suspended() {
        let volume = MemoryVolume::new(3);
        let mut index = volume.open_index();
        index.set_to("name").unwrap();
        let mut iterator = index.create_iterator().unwrap();
        iterator.suspend();
        assert!(iterator.fetch_next_entry(&mut Vec::new()).is_err());
        iterator.resume();
        assert_eq!(iterator.fetch_next_entry(&mut Vec::new()).unwrap(), None);
    }
}
