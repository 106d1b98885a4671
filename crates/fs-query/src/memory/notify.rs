use parking_lot::Mutex;

use crate::policy::QueryNotifier;
use crate::types::{Listener, NodeId, NotificationKind, QueryNotification, VolumeId};

/// Notifier that keeps every notification until it is drained.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<QueryNotification>>,
}

impl RecordingNotifier {
    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<QueryNotification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    fn record(
        &self,
        kind: NotificationKind,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    ) {
        log::trace!("{kind:?} {parent}/{name} ({node}) for port {}", listener.port);
        self.notifications.lock().push(QueryNotification {
            kind,
            listener,
            volume,
            parent,
            name: name.to_string(),
            node,
        });
    }
}

impl QueryNotifier for RecordingNotifier {
    fn entry_created(
        &self,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    ) {
        self.record(NotificationKind::EntryCreated, listener, volume, parent, name, node);
    }

    fn entry_removed(
        &self,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    ) {
        self.record(NotificationKind::EntryRemoved, listener, volume, parent, name, node);
    }

    fn attribute_changed(
        &self,
        listener: Listener,
        volume: VolumeId,
        parent: NodeId,
        name: &str,
        node: NodeId,
    ) {
        self.record(NotificationKind::AttributeChanged, listener, volume, parent, name, node);
    }
}
