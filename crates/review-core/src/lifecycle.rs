//! Teardown and relevance guards for async work.
//!
//! Nothing in flight is ever aborted. Instead, work captures a guard when it
//! starts and checks it before applying its result: an `ActiveGuard` goes
//! dead when its `ViewLifecycle` is closed, and a `RequestTicket` goes stale
//! once a newer request has been issued from the same tracker.

use std::sync::{Arc, Weak};

/// Owner side of a view's lifetime. Closing (or dropping) it kills every guard.
#[derive(Debug)]
pub struct ViewLifecycle {
    alive: Option<Arc<()>>,
}

impl ViewLifecycle {
    pub fn new() -> Self {
        Self {
            alive: Some(Arc::new(())),
        }
    }

    /// Capture a guard at the start of an async operation.
    pub fn guard(&self) -> ActiveGuard {
        ActiveGuard {
            alive: self.alive.as_ref().map(Arc::downgrade).unwrap_or_default(),
        }
    }

    pub fn close(&mut self) {
        self.alive = None;
    }

    pub fn is_open(&self) -> bool {
        self.alive.is_some()
    }
}

impl Default for ViewLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Captured at the start of async work; checked before applying its result.
#[derive(Debug, Clone)]
pub struct ActiveGuard {
    alive: Weak<()>,
}

impl ActiveGuard {
    pub fn is_active(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// Issues monotonically numbered tickets; only the newest one is current.
#[derive(Debug, Default)]
pub struct RequestTracker {
    generation: u64,
}

/// Proof that a request was issued, checked when its response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    generation: u64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, making every earlier ticket stale.
    pub fn begin(&mut self) -> RequestTicket {
        self.generation += 1;
        RequestTicket {
            generation: self.generation,
        }
    }

    /// Make every outstanding ticket stale without issuing a new one.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        ticket.generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_dies_on_close() {
        let mut lifecycle = ViewLifecycle::new();
        let guard = lifecycle.guard();
        assert!(guard.is_active());

        lifecycle.close();
        assert!(!guard.is_active());
        assert!(!lifecycle.guard().is_active());
    }

    #[test]
    fn test_guard_dies_on_drop() {
        let lifecycle = ViewLifecycle::new();
        let guard = lifecycle.guard();
        drop(lifecycle);
        assert!(!guard.is_active());
    }

    #[test]
    fn test_newer_ticket_supersedes_older() {
        let mut tracker = RequestTracker::new();
        let first = tracker.begin();
        assert!(tracker.is_current(first));

        let second = tracker.begin();
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));

        tracker.invalidate();
        assert!(!tracker.is_current(second));
    }
}
