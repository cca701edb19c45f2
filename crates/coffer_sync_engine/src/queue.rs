//! Per-entity FIFO serialization queues.
//!
//! Every mutating operation against one entity's ledger (local write,
//! upload start/commit, adoption, archival) runs while holding that
//! entity's queue guard. A second request queues behind the first in
//! arrival order rather than running concurrently or being rejected;
//! operations on distinct entities proceed independently.
//!
//! Transfers do not hold the guard for their full duration: only the
//! version-number start and commit steps are serialized, bulk byte movement
//! runs outside the queue.

use coffer_core::EntityId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

struct TicketState {
    next: u64,
    serving: u64,
}

struct EntityQueue {
    state: Mutex<TicketState>,
    turn: Condvar,
}

/// Registry of per-entity FIFO queues.
#[derive(Default)]
pub struct EntityQueues {
    queues: Mutex<HashMap<EntityId, Arc<EntityQueue>>>,
}

impl EntityQueues {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until it is this caller's turn on the entity, FIFO by
    /// arrival. The returned guard releases the queue on drop.
    pub fn lock(&self, entity: EntityId) -> QueueGuard {
        let queue = {
            let mut queues = self.queues.lock();
            Arc::clone(queues.entry(entity).or_insert_with(|| {
                Arc::new(EntityQueue {
                    state: Mutex::new(TicketState { next: 0, serving: 0 }),
                    turn: Condvar::new(),
                })
            }))
        };

        let mut state = queue.state.lock();
        let ticket = state.next;
        state.next += 1;
        while state.serving != ticket {
            queue.turn.wait(&mut state);
        }
        drop(state);

        QueueGuard { queue }
    }
}

/// Exclusive hold of one entity's queue head.
pub struct QueueGuard {
    queue: Arc<EntityQueue>,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.serving += 1;
        self.queue.turn.notify_all();
    }
}
