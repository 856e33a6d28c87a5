//! Cooperative pause gate shared by concurrently running jobs.
//!
//! A `SuspendController` is a cloneable handle; every clone refers to the
//! same gate. Jobs call [`SuspendController::wait_resumed`] at their
//! checkpoints and block (without spinning) while the gate is armed.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Gate {
    paused: bool,
    /// Incremented on every arming. A waiter is released once the epoch it
    /// observed has been disarmed, even if the gate is re-armed before the
    /// waiter gets to run again.
    epoch: u64,
}

#[derive(Debug, Default)]
struct Shared {
    gate: Mutex<Gate>,
    released: Condvar,
}

/// Shared pause/resume gate.
#[derive(Debug, Clone, Default)]
pub struct SuspendController {
    shared: Arc<Shared>,
}

impl SuspendController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the gate. No-op if already paused.
    pub fn pause(&self) {
        let mut gate = self.shared.gate.lock();
        if !gate.paused {
            gate.paused = true;
            gate.epoch = gate.epoch.wrapping_add(1);
            tracing::debug!(epoch = gate.epoch, "suspend gate armed");
        }
    }

    /// Disarm the gate and release every waiter. No-op if not paused.
    pub fn resume(&self) {
        let mut gate = self.shared.gate.lock();
        if gate.paused {
            gate.paused = false;
            tracing::debug!(epoch = gate.epoch, "suspend gate released");
            self.shared.released.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.gate.lock().paused
    }

    /// Block until the gate is disarmed.
    ///
    /// Returns immediately with `false` if the gate is not armed, or `true`
    /// after having waited.
    pub fn wait_resumed(&self) -> bool {
        let mut gate = self.shared.gate.lock();
        if !gate.paused {
            return false;
        }
        let armed_at = gate.epoch;
        while gate.paused && gate.epoch == armed_at {
            self.shared.released.wait(&mut gate);
        }
        true
    }
}
