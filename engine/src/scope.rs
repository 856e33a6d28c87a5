//! Run scope: the cancellation and pause signals shared by one batch.
//!
//! One `RunScope` is created per batch and cloned into every job of that
//! batch. Any holder of a clone (the engine, a UI, a process monitor) can
//! pause, resume or cancel all of the batch's jobs at once.

use crate::suspend::SuspendController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Cooperative cancellation flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What a job should do at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Keep going
    Continue,
    /// Keep going; the job was held at the gate and has just been released
    Resumed,
    /// Stop the job
    Cancelled,
}

/// Shared control context for one batch of jobs.
#[derive(Debug, Clone)]
pub struct RunScope {
    id: Uuid,
    cancel: CancelToken,
    suspend: SuspendController,
}

impl Default for RunScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RunScope {
    pub fn new() -> Self {
        RunScope {
            id: Uuid::new_v4(),
            cancel: CancelToken::new(),
            suspend: SuspendController::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn suspend(&self) -> &SuspendController {
        &self.suspend
    }

    pub fn pause(&self) {
        self.suspend.pause();
    }

    pub fn resume(&self) {
        self.suspend.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.suspend.is_paused()
    }

    /// Signal cancellation. Jobs held at the pause gate are released so they
    /// can observe it.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.suspend.resume();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Evaluate a checkpoint: cancellation first, then the pause gate.
    ///
    /// `on_pause` runs before blocking so the caller can publish a `Paused`
    /// status; it is not called when the gate is open.
    pub fn checkpoint(&self, on_pause: impl FnOnce()) -> Checkpoint {
        if self.is_cancelled() {
            return Checkpoint::Cancelled;
        }
        if !self.suspend.is_paused() {
            return Checkpoint::Continue;
        }
        on_pause();
        self.suspend.wait_resumed();
        if self.is_cancelled() {
            Checkpoint::Cancelled
        } else {
            Checkpoint::Resumed
        }
    }
}
