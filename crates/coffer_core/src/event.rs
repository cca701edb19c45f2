//! Per-entity multiplexed event stream.
//!
//! One [`EventBus`] carries every local-origin, remote-origin, and
//! task-origin event. Subscriptions are per-path, optionally recursive to a
//! bounded depth. Dropping a receiver detaches the listener only: in-flight
//! uploads and downloads are background work decoupled from observers and
//! keep running.

use crate::types::{EntityPath, TaskId, Version};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// An event published on the bus.
///
/// The set is closed: the bus boundary matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A local write produced a new version of a file.
    FileChange {
        /// The file that changed.
        path: EntityPath,
        /// The new local version.
        version: Version,
    },
    /// A child entry was added to a folder.
    EntryAddition {
        /// The folder that changed.
        path: EntityPath,
        /// The added child name.
        name: String,
    },
    /// A child entry was removed from a folder.
    EntryRemoval {
        /// The folder that changed.
        path: EntityPath,
        /// The removed child name.
        name: String,
    },
    /// A child entry was renamed within a folder.
    EntryRenaming {
        /// The folder that changed.
        path: EntityPath,
        /// The previous child name.
        from: String,
        /// The new child name.
        to: String,
    },
    /// The remote has a version newer than the last known one.
    RemoteChange {
        /// The entity that changed remotely.
        path: EntityPath,
        /// The remote's latest version.
        version: Version,
    },
    /// The entity was removed on the remote.
    RemoteRemoval {
        /// The removed entity.
        path: EntityPath,
    },
    /// An archived version was removed on the remote.
    RemoteArchVerRemoval {
        /// The entity involved.
        path: EntityPath,
        /// The removed archived version.
        version: Version,
    },
    /// A version was archived on the remote.
    RemoteVersionArchival {
        /// The entity involved.
        path: EntityPath,
        /// The archived version.
        version: Version,
    },
    /// An upload task started.
    UploadStarted {
        /// The entity being uploaded.
        path: EntityPath,
        /// The task's identifier.
        task_id: TaskId,
        /// The version being published.
        version: Version,
        /// Total bytes to transmit.
        bytes_total: u64,
    },
    /// An upload task completed and the synced branch advanced.
    UploadDone {
        /// The uploaded entity.
        path: EntityPath,
        /// The task's identifier.
        task_id: TaskId,
        /// The version now on the synced branch.
        version: Version,
    },
    /// A download task started.
    DownloadStarted {
        /// The entity being fetched.
        path: EntityPath,
        /// The task's identifier.
        task_id: TaskId,
        /// The version being fetched.
        version: Version,
        /// Total bytes to retrieve.
        bytes_total: u64,
    },
    /// A download task made progress.
    DownloadProgress {
        /// The entity being fetched.
        path: EntityPath,
        /// The task's identifier.
        task_id: TaskId,
        /// The version being fetched.
        version: Version,
        /// Bytes received so far.
        bytes_received: u64,
        /// Total bytes to retrieve.
        bytes_total: u64,
    },
    /// A download task completed; the version is fully on disk.
    DownloadDone {
        /// The fetched entity.
        path: EntityPath,
        /// The task's identifier.
        task_id: TaskId,
        /// The fetched version.
        version: Version,
    },
}

impl SyncEvent {
    /// Returns the path the event concerns.
    #[must_use]
    pub fn path(&self) -> &EntityPath {
        match self {
            SyncEvent::FileChange { path, .. }
            | SyncEvent::EntryAddition { path, .. }
            | SyncEvent::EntryRemoval { path, .. }
            | SyncEvent::EntryRenaming { path, .. }
            | SyncEvent::RemoteChange { path, .. }
            | SyncEvent::RemoteRemoval { path }
            | SyncEvent::RemoteArchVerRemoval { path, .. }
            | SyncEvent::RemoteVersionArchival { path, .. }
            | SyncEvent::UploadStarted { path, .. }
            | SyncEvent::UploadDone { path, .. }
            | SyncEvent::DownloadStarted { path, .. }
            | SyncEvent::DownloadProgress { path, .. }
            | SyncEvent::DownloadDone { path, .. } => path,
        }
    }
}

struct Subscription {
    root: EntityPath,
    /// `None` = exact path only; `Some(d)` = descendants down to depth `d`.
    depth: Option<u32>,
    sender: Sender<SyncEvent>,
}

impl Subscription {
    fn wants(&self, path: &EntityPath) -> bool {
        match self.depth {
            None => self.root == *path,
            Some(limit) => self
                .root
                .depth_to(path)
                .is_some_and(|d| d <= limit),
        }
    }
}

/// Distributes sync events to per-path subscribers.
///
/// Keeps a bounded history of recent events for polling catch-up, in the
/// same shape the storage layer's change feed uses.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscription>>,
    history: RwLock<Vec<SyncEvent>>,
    max_history: usize,
}

impl EventBus {
    /// Creates an event bus with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(4096)
    }

    /// Creates an event bus with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to events for exactly one path.
    pub fn subscribe(&self, path: &EntityPath) -> Receiver<SyncEvent> {
        self.attach(path.clone(), None)
    }

    /// Subscribes to a path and its descendants down to `depth` segments.
    ///
    /// `depth = 0` behaves like [`subscribe`](Self::subscribe).
    pub fn subscribe_recursive(&self, path: &EntityPath, depth: u32) -> Receiver<SyncEvent> {
        self.attach(path.clone(), Some(depth))
    }

    fn attach(&self, root: EntityPath, depth: Option<u32>) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(Subscription { root, depth, sender: tx });
        rx
    }

    /// Publishes an event to every matching subscriber.
    ///
    /// Disconnected subscribers are detached; nothing else is affected.
    pub fn publish(&self, event: SyncEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sub| {
            if sub.wants(event.path()) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                // Keep silent subscribers; they may match later events.
                true
            }
        });
    }

    /// Returns recent events under `path`, up to `limit`.
    #[must_use]
    pub fn recent(&self, path: &EntityPath, limit: usize) -> Vec<SyncEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| path.contains(e.path()))
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn change(path: &str, version: u64) -> SyncEvent {
        SyncEvent::FileChange { path: EntityPath::new(path), version: Version(version) }
    }

    #[test]
    fn exact_path_subscription() {
        let bus = EventBus::new();
        let rx = bus.subscribe(&EntityPath::new("/a/b"));

        bus.publish(change("/a/b", 1));
        bus.publish(change("/a/other", 1));

        let got = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(got.path(), &EntityPath::new("/a/b"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn recursive_subscription_bounded_by_depth() {
        let bus = EventBus::new();
        let rx = bus.subscribe_recursive(&EntityPath::new("/a"), 1);

        bus.publish(change("/a", 1));
        bus.publish(change("/a/b", 1));
        bus.publish(change("/a/b/c", 1)); // depth 2, beyond the bound

        assert_eq!(rx.try_recv().unwrap().path(), &EntityPath::new("/a"));
        assert_eq!(rx.try_recv().unwrap().path(), &EntityPath::new("/a/b"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_is_detached_on_next_matching_publish() {
        let bus = EventBus::new();
        let rx = bus.subscribe(&EntityPath::new("/a"));
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(change("/a", 1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe(&EntityPath::new("/a"));
        let rx2 = bus.subscribe_recursive(&EntityPath::root(), 8);

        bus.publish(change("/a", 2));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn history_is_bounded_and_filtered() {
        let bus = EventBus::with_max_history(3);
        for i in 1..=5 {
            bus.publish(change("/a", i));
        }
        bus.publish(change("/b", 1));

        let recent = bus.recent(&EntityPath::new("/a"), 10);
        assert_eq!(recent.len(), 2);
        let all = bus.recent(&EntityPath::root(), 10);
        assert_eq!(all.len(), 3);
    }
}
