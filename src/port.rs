//! Outbound notifications to whoever is presenting the namespace.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::coalesce::ChangedFile;
use crate::index::Collision;

/// Push transport towards the editor client.
///
/// Calls are fire-and-forget: implementations must not block and must not
/// fail the caller.
pub trait NotificationPort: Send + Sync {
    fn files_changed(&self, files: &[ChangedFile]);
    fn duplicate_assets_detected(&self, collisions: &[Collision]);
    fn index_rebuilt(&self);
}

/// A notification as it would travel over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    FilesChanged { files: Vec<ChangedFile> },
    DuplicateAssetsDetected { collisions: Vec<Collision> },
    IndexRebuilt,
}

/// In-process fan-out of notifications over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPort {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastPort {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    fn publish(&self, notification: Notification) {
        // No subscribers is not an error.
        let _ = self.tx.send(notification);
    }
}

impl Default for BroadcastPort {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationPort for BroadcastPort {
    fn files_changed(&self, files: &[ChangedFile]) {
        self.publish(Notification::FilesChanged {
            files: files.to_vec(),
        });
    }

    fn duplicate_assets_detected(&self, collisions: &[Collision]) {
        self.publish(Notification::DuplicateAssetsDetected {
            collisions: collisions.to_vec(),
        });
    }

    fn index_rebuilt(&self) {
        self.publish(Notification::IndexRebuilt);
    }
}
