//! Shared engine context.

use crate::config::EngineConfig;
use crate::local::LocalStore;
use crate::online::OnlineGate;
use crate::queue::EntityQueues;
use coffer_core::{EventBus, LedgerBook, TaskId};
use coffer_remote::RemoteClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Allocates task IDs from one process-wide counter.
///
/// Uploads, downloads, and implicit range fetches all draw from the same
/// space, so a task ID identifies a transfer regardless of direction.
#[derive(Debug, Default)]
pub struct TaskCounter {
    next: AtomicU64,
}

impl TaskCounter {
    /// Creates a counter starting at task 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    /// Returns the next task ID.
    pub fn next(&self) -> TaskId {
        TaskId::new(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// State shared by every engine component.
pub(crate) struct Shared {
    pub config: EngineConfig,
    pub ledgers: LedgerBook,
    pub store: LocalStore,
    pub remote: Arc<dyn RemoteClient>,
    pub bus: EventBus,
    pub queues: EntityQueues,
    pub online: OnlineGate,
    pub tasks: TaskCounter,
}
