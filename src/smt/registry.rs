//! Shared process-identifier registry used for cross-worker cancellation
//! (spec §4.1: "The driver registers each solver's process identifier
//! with a shared registry so the portfolio can signal termination"; §5:
//! "the portfolio 'sibling-pids' queue used to broadcast a stop signal").
//!
//! Grounded on `gat-solver-common::subprocess::SolverProcess`'s
//! child-handle ownership pattern, generalized from one-shot `solve()`
//! calls to a registry of long-lived handles shared across portfolio
//! workers.

use std::collections::BTreeMap;
use std::process::Child;
use std::sync::Arc;

use parking_lot::Mutex;

/// A killable handle: the child process, once its stdin/stdout have
/// been taken by the owning [`crate::smt::process::ProcessSolver`], kept
/// around solely so a sibling worker can call `kill()` on it.
pub type Handle = Arc<Mutex<Option<Child>>>;

/// Maps OS process id -> killable handle. Cloned (cheaply, it's an
/// `Arc`) into every portfolio worker so any worker can terminate any
/// other worker's solver.
#[derive(Clone, Default)]
pub struct PidRegistry {
    handles: Arc<Mutex<BTreeMap<u32, Handle>>>,
}

impl PidRegistry {
    pub fn new() -> Self {
        PidRegistry::default()
    }

    pub fn register(&self, pid: u32, handle: Handle) {
        self.handles.lock().insert(pid, handle);
    }

    pub fn deregister(&self, pid: u32) {
        self.handles.lock().remove(&pid);
    }

    /// Kills one solver process by pid. Idempotent: a pid already
    /// deregistered or already killed is a no-op.
    pub fn kill(&self, pid: u32) {
        if let Some(handle) = self.handles.lock().get(&pid).cloned() {
            if let Some(mut child) = handle.lock().take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }

    /// Kills every registered solver except `keep` (the winning
    /// worker's own process, if it is still registered) — used by the
    /// portfolio scheduler once a verdict has been decided (spec §4.9).
    pub fn kill_all_except(&self, keep: u32) {
        let pids: Vec<u32> = self
            .handles
            .lock()
            .keys()
            .copied()
            .filter(|&pid| pid != keep)
            .collect();
        for pid in pids {
            self.kill(pid);
        }
    }

    pub fn kill_all(&self) {
        let pids: Vec<u32> = self.handles.lock().keys().copied().collect();
        for pid in pids {
            self.kill(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deregistering_unknown_pid_is_a_no_op() {
        let reg = PidRegistry::new();
        reg.deregister(12345);
        reg.kill(12345);
    }
}
