//! Live query maintenance.
//!
//! The host calls these whenever an attribute or entry name changes. The
//! query compares the old and the new value against its whole expression and
//! tells its listener whether the entry joined, left, or changed inside the
//! result set.

use crate::policy::{Context, Entry, Node};
use crate::types::{NodeId, NotificationKind, QueryFlags, TypeCode};

use super::engine::Query;
use super::term::LiveAttribute;

impl<C: Context> Query<'_, C> {
    /// Reports a change of `attribute` on `node` from `old_key` to `new_key`.
    ///
    /// `None` keys mean the attribute did not exist before or does not exist
    /// any more. Without an `entry`, queries that read names are evaluated
    /// once per hard link of `node`.
    pub fn live_update(
        &mut self,
        entry: Option<&C::Entry>,
        node: &C::Node,
        attribute: &str,
        type_code: TypeCode,
        old_key: Option<&[u8]>,
        new_key: Option<&[u8]>,
    ) {
        if !self.listener.is_valid() {
            return;
        }

        if entry.is_none() && self.needs_entry {
            for referrer in node.referrers() {
                self.live_update(Some(&referrer), node, attribute, type_code, old_key, new_key);
            }
            return;
        }

        let old = self.match_live(entry, node, attribute, type_code, old_key);
        let new = self.match_live(entry, node, attribute, type_code, new_key);
        let kind = match (old, new) {
            (false, false) => return,
            (false, true) => NotificationKind::EntryCreated,
            (true, false) => NotificationKind::EntryRemoved,
            (true, true) if self.flags.contains(QueryFlags::ATTR_CHANGE_NOTIFICATION) => {
                NotificationKind::AttributeChanged
            }
            (true, true) => return,
        };

        match entry {
            Some(entry) => self.send_entry_notification(entry, kind),
            None => {
                for referrer in node.referrers() {
                    self.send_entry_notification(&referrer, kind);
                }
            }
        }
    }

    /// Reports that an entry of `node` moved from `old_directory/old_name` to
    /// `new_directory/new_name`.
    ///
    /// Only entries that stay in the result set are reported, as a removal
    /// under the old name followed by a creation under the new one. Entries
    /// that join or leave the set through the rename are left to
    /// [`Query::live_update`].
    pub fn live_update_rename_move(
        &mut self,
        entry: Option<&C::Entry>,
        node: &C::Node,
        old_directory: NodeId,
        old_name: &str,
        new_directory: NodeId,
        new_name: &str,
    ) {
        if !self.listener.is_valid() {
            return;
        }

        let old = self.match_live(entry, node, "name", TypeCode::String, Some(old_name.as_bytes()));
        let new = self.match_live(entry, node, "name", TypeCode::String, Some(new_name.as_bytes()));
        if !(old && new) {
            return;
        }

        match entry {
            Some(entry) => {
                let id = entry.node_id();
                self.notify(NotificationKind::EntryRemoved, old_directory, old_name, id);
                self.notify(NotificationKind::EntryCreated, new_directory, new_name, id);
            }
            None => {
                for referrer in node.referrers() {
                    self.send_entry_notification(&referrer, NotificationKind::EntryRemoved);
                    self.send_entry_notification(&referrer, NotificationKind::EntryCreated);
                }
            }
        }
    }

    fn match_live(
        &mut self,
        entry: Option<&C::Entry>,
        node: &C::Node,
        attribute: &str,
        type_code: TypeCode,
        key: Option<&[u8]>,
    ) -> bool {
        let live = LiveAttribute {
            name: attribute,
            type_code,
            key,
        };
        let root = self.expression.root();
        match self
            .expression
            .tree_mut()
            .match_term(root, entry, node, Some(&live))
        {
            Ok(result) => result.is_match(),
            Err(err) => {
                log::debug!("live update of {attribute} treated as no match: {err}");
                false
            }
        }
    }

    fn send_entry_notification(&self, entry: &C::Entry, kind: NotificationKind) {
        match entry.name() {
            Some(name) => self.notify(kind, entry.parent_id(), &name, entry.node_id()),
            None => log::warn!("cannot notify about entry {} without a name", entry.node_id()),
        }
    }

    fn notify(&self, kind: NotificationKind, parent: NodeId, name: &str, node: NodeId) {
        let notifier = self.context.notifier();
        let volume = self.context.volume_id();
        let listener = self.listener;
        match kind {
            NotificationKind::EntryCreated => {
                notifier.entry_created(listener, volume, parent, name, node)
            }
            NotificationKind::EntryRemoved => {
                notifier.entry_removed(listener, volume, parent, name, node)
            }
            NotificationKind::AttributeChanged => {
                notifier.attribute_changed(listener, volume, parent, name, node)
            }
        }
    }
}
