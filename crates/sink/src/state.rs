use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const SINKING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Shared state of one table's sink. Rows from a table that has begun
/// stopping are dropped with their callbacks fired, so a remove-table acts
/// as a cancellation of everything still queued.
#[derive(Clone, Default)]
pub struct TableState(Arc<AtomicU8>);

impl TableState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sinking(&self) -> bool {
        self.0.load(Ordering::Acquire) == SINKING
    }

    pub fn stop(&self) {
        let _ = self
            .0
            .compare_exchange(SINKING, STOPPING, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn mark_stopped(&self) {
        self.0.store(STOPPED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_transitions_once() {
        let state = TableState::new();
        assert!(state.is_sinking());
        state.stop();
        assert!(!state.is_sinking());
        state.mark_stopped();
        assert!(!state.is_sinking());
    }
}
