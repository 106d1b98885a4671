//! Ordered attribute indexes of the in-memory volume.
//!
//! Each index maps typed keys to a sorted list of slots. The `name` index
//! stores directory entries; every other index stores node ids.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use thin_vec::ThinVec;

use crate::error::{QueryError, Result};
use crate::policy::{Index, IndexIterator, Node};
use crate::types::{NodeId, TypeCode};
use crate::value::compare_keys;

use super::volume::{MemoryEntry, MemoryVolume, SharedState};

/// Indexes larger than this many entries get no selectivity bonus.
const WEIGHT_BASE: usize = 1 << 20;

/// Largest selectivity multiplier, given to tiny indexes.
const MAX_WEIGHT: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct IndexKey {
    type_code: TypeCode,
    bytes: Vec<u8>,
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(self.type_code, &self.bytes, &other.bytes)
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

/// What an index key points at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum IndexSlot {
    Entry { parent: NodeId, name: String },
    Node(NodeId),
}

#[derive(Debug, Clone)]
pub(crate) struct IndexRecord {
    type_code: TypeCode,
    keys: BTreeMap<IndexKey, ThinVec<IndexSlot>>,
    entries: usize,
}

impl IndexRecord {
    pub(crate) fn new(type_code: TypeCode) -> Self {
        Self {
            type_code,
            keys: BTreeMap::new(),
            entries: 0,
        }
    }

    pub(crate) fn type_code(&self) -> TypeCode {
        self.type_code
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
    }

    fn key(&self, bytes: &[u8]) -> IndexKey {
        IndexKey {
            type_code: self.type_code,
            bytes: bytes.to_vec(),
        }
    }

    /// Inserts `slot` under `key`, keeping slots sorted and unique.
    pub(crate) fn insert(&mut self, key: &[u8], slot: IndexSlot) {
        let key = self.key(key);
        let slots = self.keys.entry(key).or_default();
        if let Err(position) = slots.binary_search(&slot) {
            slots.insert(position, slot);
            self.entries += 1;
        }
    }

    pub(crate) fn remove(&mut self, key: &[u8], slot: &IndexSlot) -> bool {
        let key = self.key(key);
        let Some(slots) = self.keys.get_mut(&key) else {
            return false;
        };
        let Ok(position) = slots.binary_search(slot) else {
            return false;
        };
        slots.remove(position);
        if slots.is_empty() {
            self.keys.remove(&key);
        }
        self.entries -= 1;
        true
    }

    fn contains_key(&self, key: &[u8]) -> bool {
        self.keys.contains_key(&self.key(key))
    }

    /// The slots stored under `key`, in order.
    fn slots(&self, key: &[u8]) -> &[IndexSlot] {
        self.keys
            .get(&self.key(key))
            .map(|slots| slots.as_slice())
            .unwrap_or_default()
    }

    fn holds(&self, key: &[u8], slot: &IndexSlot) -> bool {
        self.slots(key).binary_search(slot).is_ok()
    }

    /// The first pair after `cursor`, with the number of slots under its key.
    fn next_pair(&self, cursor: &Cursor) -> Option<(&IndexKey, &IndexSlot, usize)> {
        match cursor {
            Cursor::Start => self.keys.iter().find_map(first_slot),
            Cursor::Before(bytes) => self.keys.range(&self.key(bytes)..).find_map(first_slot),
            Cursor::After(bytes, slot, _) => {
                let key = self.key(bytes);
                if let Some((stored, slots)) = self.keys.get_key_value(&key) {
                    if let Some(next) = slots.iter().find(|candidate| *candidate > slot) {
                        return Some((stored, next, slots.len()));
                    }
                }
                self.keys
                    .range((Bound::Excluded(&key), Bound::Unbounded))
                    .find_map(first_slot)
            }
            Cursor::PastKey(bytes) => self
                .keys
                .range((Bound::Excluded(&self.key(bytes)), Bound::Unbounded))
                .find_map(first_slot),
        }
    }
}

fn first_slot<'a>(
    (key, slots): (&'a IndexKey, &'a ThinVec<IndexSlot>),
) -> Option<(&'a IndexKey, &'a IndexSlot, usize)> {
    slots.first().map(|slot| (key, slot, slots.len()))
}

// ---------------------------------------------------------------------------
// Index handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Selected {
    attribute: String,
    type_code: TypeCode,
    entries: usize,
}

/// Handle onto one index of a [`MemoryVolume`].
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    state: SharedState,
    selected: Option<Selected>,
}

impl MemoryIndex {
    pub(crate) fn new(state: SharedState) -> Self {
        Self {
            state,
            selected: None,
        }
    }

    /// The attribute the handle points at, if any.
    pub fn attribute(&self) -> Option<&str> {
        self.selected.as_ref().map(|selected| selected.attribute.as_str())
    }
}

impl Index for MemoryIndex {
    type Iterator = MemoryIndexIterator;

    fn set_to(&mut self, attribute: &str) -> Result<()> {
        let state = self.state.read();
        self.selected = state.indexes.get(attribute).map(|record| Selected {
            attribute: attribute.to_string(),
            type_code: record.type_code(),
            entries: record.len(),
        });
        match self.selected {
            Some(_) => Ok(()),
            None => Err(QueryError::EntryNotFound),
        }
    }

    fn unset(&mut self) {
        self.selected = None;
    }

    fn type_code(&self) -> TypeCode {
        self.selected
            .as_ref()
            .map_or(TypeCode::String, |selected| selected.type_code)
    }

    fn key_size(&self) -> usize {
        self.type_code().fixed_size().unwrap_or(0)
    }

    fn weighted_score(&self, score: i32) -> i32 {
        let entries = self.selected.as_ref().map_or(0, |selected| selected.entries);
        let weight = (WEIGHT_BASE / entries.max(1)).clamp(1, MAX_WEIGHT);
        score.saturating_mul(weight as i32)
    }

    fn create_iterator(&self) -> Result<MemoryIndexIterator> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| QueryError::Index("no index selected".into()))?;
        Ok(MemoryIndexIterator {
            state: self.state.clone(),
            attribute: selected.attribute.clone(),
            cursor: Cursor::Start,
            suspended: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Iterator
// ---------------------------------------------------------------------------

/// Position of an iterator, expressed in keys so it survives mutation.
#[derive(Debug, Clone, PartialEq)]
enum Cursor {
    Start,
    /// Before the first key not less than this one.
    Before(Vec<u8>),
    /// On this pair. For a node slot, the last field is the hard link
    /// that was returned.
    After(Vec<u8>, IndexSlot, usize),
    /// After every pair with this key.
    PastKey(Vec<u8>),
}

/// Forward cursor over one index of a [`MemoryVolume`].
///
/// The volume lock is only held inside each call, so the volume can be
/// modified between calls; the cursor continues after the last pair it
/// returned.
#[derive(Debug)]
pub struct MemoryIndexIterator {
    state: SharedState,
    attribute: String,
    cursor: Cursor,
    suspended: bool,
}

impl MemoryIndexIterator {
    fn ensure_active(&self) -> Result<()> {
        if self.suspended {
            return Err(QueryError::Index(format!(
                "iterator over {} is suspended",
                self.attribute
            )));
        }
        Ok(())
    }
}

impl IndexIterator for MemoryIndexIterator {
    type Context = MemoryVolume;
    type Entry = MemoryEntry;

    fn find(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_active()?;
        let state = self.state.read();
        let record = state
            .indexes
            .get(&self.attribute)
            .ok_or_else(|| QueryError::Index(format!("index {} was removed", self.attribute)))?;
        self.cursor = Cursor::Before(key.to_vec());
        if record.contains_key(key) {
            Ok(())
        } else {
            Err(QueryError::EntryNotFound)
        }
    }

    fn fetch_next_entry(&mut self, key: &mut Vec<u8>) -> Result<Option<usize>> {
        self.ensure_active()?;
        let state = self.state.read();
        let record = state
            .indexes
            .get(&self.attribute)
            .ok_or_else(|| QueryError::Index(format!("index {} was removed", self.attribute)))?;

        // Every hard link of a node is its own entry under the node's key.
        if let Cursor::After(bytes, slot @ IndexSlot::Node(id), link) = &self.cursor {
            if link + 1 < state.referrer_count(*id) && record.holds(bytes, slot) {
                key.clear();
                key.extend_from_slice(bytes);
                let duplicates = state.entries_under(record.slots(bytes));
                self.cursor = Cursor::After(bytes.clone(), slot.clone(), link + 1);
                return Ok(Some(duplicates));
            }
        }

        let mut cursor = self.cursor.clone();
        while let Some((found, slot, _)) = record.next_pair(&cursor) {
            cursor = Cursor::After(found.bytes.clone(), slot.clone(), 0);
            // Nodes without entries, like the root, have nothing to return.
            if let IndexSlot::Node(id) = slot {
                if state.referrer_count(*id) == 0 {
                    continue;
                }
            }
            key.clear();
            key.extend_from_slice(&found.bytes);
            let duplicates = state.entries_under(record.slots(&found.bytes));
            self.cursor = cursor;
            return Ok(Some(duplicates));
        }
        self.cursor = cursor;
        Ok(None)
    }

    fn skip_duplicates(&mut self) {
        if let Cursor::After(key, _, _) = &self.cursor {
            self.cursor = Cursor::PastKey(key.clone());
        }
    }

    fn get_entry(&mut self, volume: &MemoryVolume) -> Result<MemoryEntry> {
        self.ensure_active()?;
        let Cursor::After(_, slot, link) = &self.cursor else {
            return Err(QueryError::Index("iterator is not on an entry".into()));
        };
        let entry = match slot {
            IndexSlot::Entry { parent, name } => volume.entry(*parent, name),
            IndexSlot::Node(id) => volume
                .node(*id)
                .and_then(|node| node.referrers().into_iter().nth(*link)),
        };
        entry.ok_or(QueryError::EntryNotFound)
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }

    fn resume(&mut self) {
        self.suspended = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_key(value: i64) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    #[test]
    fn record_orders_numeric_keys() {
        let mut record = IndexRecord::new(TypeCode::Int64);
        for (value, node) in [(30, 1), (-5, 2), (30, 3), (7, 4)] {
            record.insert(&int_key(value), IndexSlot::Node(node));
        }
        assert_eq!(record.len(), 4);

        let mut cursor = Cursor::Start;
        let mut seen = Vec::new();
        while let Some((key, slot, duplicates)) = record.next_pair(&cursor) {
            seen.push((key.bytes.clone(), slot.clone(), duplicates));
            cursor = Cursor::After(key.bytes.clone(), slot.clone(), 0);
        }
        assert_eq!(
            seen,
            vec![
                (int_key(-5), IndexSlot::Node(2), 1),
                (int_key(7), IndexSlot::Node(4), 1),
                (int_key(30), IndexSlot::Node(1), 2),
                (int_key(30), IndexSlot::Node(3), 2),
            ]
        );
    }

    #[test]
    fn past_key_skips_duplicates() {
        let mut record = IndexRecord::new(TypeCode::Int64);
        record.insert(&int_key(1), IndexSlot::Node(1));
        record.insert(&int_key(1), IndexSlot::Node(2));
        record.insert(&int_key(2), IndexSlot::Node(3));
        let (key, slot, _) = record.next_pair(&Cursor::PastKey(int_key(1))).unwrap();
        assert_eq!(key.bytes, int_key(2));
        assert_eq!(slot, &IndexSlot::Node(3));
    }

    #[test]
    fn removing_last_slot_drops_key() {
        let mut record = IndexRecord::new(TypeCode::String);
        let slot = IndexSlot::Entry {
            parent: 1,
            name: "a".into(),
        };
        record.insert(b"a", slot.clone());
        record.insert(b"a", slot.clone());
        assert_eq!(record.len(), 1);
        assert!(record.remove(b"a", &slot));
        assert!(!record.contains_key(b"a"));
        assert!(!record.remove(b"a", &slot));
        assert_eq!(record.len(), 0);
    }

    #[test]
    fn cursor_survives_removal_of_current_pair() {
        let mut record = IndexRecord::new(TypeCode::Int64);
        record.insert(&int_key(1), IndexSlot::Node(1));
        record.insert(&int_key(2), IndexSlot::Node(2));
        let cursor = Cursor::After(int_key(1), IndexSlot::Node(1), 0);
        record.remove(&int_key(1), &IndexSlot::Node(1));
        let (key, _, _) = record.next_pair(&cursor).unwrap();
        assert_eq!(key.bytes, int_key(2));
    }

    #[test]
    fn slots_are_looked_up_by_key() {
        let mut record = IndexRecord::new(TypeCode::Int64);
        record.insert(&int_key(4), IndexSlot::Node(9));
        record.insert(&int_key(4), IndexSlot::Node(2));
        assert_eq!(
            record.slots(&int_key(4)),
            &[IndexSlot::Node(2), IndexSlot::Node(9)]
        );
        assert!(record.holds(&int_key(4), &IndexSlot::Node(9)));
        assert!(!record.holds(&int_key(4), &IndexSlot::Node(3)));
        assert!(record.slots(&int_key(5)).is_empty());
    }
}
