//! Process-wide run/pause flags shared by every worker.
//!
//! Workers poll these between steps; nothing is locked. A one-iteration-late
//! observation of a flag flip is acceptable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RunState {
    running: AtomicBool,
    paused: AtomicBool,
    session: AtomicU64,
}

impl RunState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enter the running state. Returns false if already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.paused.store(false, Ordering::Release);
        self.session.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Flip pause. Returns the new pause value, or None when not running.
    pub fn toggle_pause(&self) -> Option<bool> {
        if !self.is_running() {
            return None;
        }
        let was = self.paused.fetch_xor(true, Ordering::AcqRel);
        Some(!was)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// A view bound to the current session, handed to workers at spawn time.
    pub fn handle(self: &Arc<Self>) -> RunHandle {
        RunHandle { state: Arc::clone(self), session: self.session() }
    }
}

/// Worker-side view of [`RunState`]. Once the session it was created in
/// ends, it reports "not running" even if a newer session has started.
#[derive(Debug, Clone)]
pub struct RunHandle {
    state: Arc<RunState>,
    session: u64,
}

impl RunHandle {
    pub fn is_running(&self) -> bool {
        self.state.is_running() && self.state.session() == self.session
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }
}
