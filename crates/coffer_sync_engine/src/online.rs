//! Process-wide connectivity gate.
//!
//! Network loss suspends in-flight and future transfer attempts
//! process-wide; server-dependent calls fail with a connectivity error
//! rather than blocking indefinitely. Already-synced local reads and writes
//! never consult the gate.

use crate::error::{SyncError, SyncResult};
use coffer_remote::RemoteError;
use parking_lot::{Condvar, Mutex};

/// Shared online/offline state.
///
/// Transfer loops park on [`wait_until_online`](Self::wait_until_online)
/// between chunks; entry points that must reach the server call
/// [`require_online`](Self::require_online) and surface `Connectivity`
/// immediately while offline.
pub struct OnlineGate {
    online: Mutex<bool>,
    changed: Condvar,
}

impl OnlineGate {
    /// Creates a gate that starts online.
    #[must_use]
    pub fn new() -> Self {
        Self { online: Mutex::new(true), changed: Condvar::new() }
    }

    /// Records a connectivity transition.
    pub fn set_online(&self, online: bool) {
        let mut state = self.online.lock();
        if *state != online {
            *state = online;
            tracing::info!(online, "connectivity changed");
            self.changed.notify_all();
        }
    }

    /// Returns the current connectivity state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.lock()
    }

    /// Fails with a connectivity error while offline.
    pub fn require_online(&self) -> SyncResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(SyncError::Remote(RemoteError::connectivity("engine is offline")))
        }
    }

    /// Blocks the calling transfer until the gate reports online.
    pub fn wait_until_online(&self) {
        let mut state = self.online.lock();
        while !*state {
            self.changed.wait(&mut state);
        }
    }
}

impl Default for OnlineGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn gate_starts_online() {
        let gate = OnlineGate::new();
        assert!(gate.is_online());
        assert!(gate.require_online().is_ok());
    }

    #[test]
    fn offline_fails_require() {
        let gate = OnlineGate::new();
        gate.set_online(false);
        let err = gate.require_online().unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn waiters_wake_on_reconnect() {
        let gate = Arc::new(OnlineGate::new());
        gate.set_online(false);

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_until_online())
        };

        thread::sleep(Duration::from_millis(20));
        gate.set_online(true);
        waiter.join().unwrap();
        assert!(gate.is_online());
    }
}
