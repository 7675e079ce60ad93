//! Readiness gates for external collaborators
//!
//! Every adapter that needs asynchronous setup (a login, a session probe)
//! hands out a [`ReadyGate`]. The sync engine joins over all gates before
//! its first tick instead of polling ambient boolean flags.

use tokio::sync::watch;

/// A clonable, one-shot readiness signal.
///
/// Starts unready; [`ReadyGate::set_ready`] flips it exactly once (further
/// calls are no-ops). All clones observe the same state.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl ReadyGate {
    /// A gate that is not yet ready
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// A gate that is ready from the start, for adapters without setup
    pub fn ready_now() -> Self {
        let gate = Self::new();
        gate.set_ready();
        gate
    }

    /// Mark the collaborator ready, waking every waiter
    pub fn set_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the collaborator is ready. May never return if the
    /// collaborator never finishes its setup.
    pub async fn ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside self, so wait_for cannot observe a closed
        // channel while this gate is alive.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}
