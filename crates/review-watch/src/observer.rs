//! Reconciled view of one spec, fed from the push channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use review_core::{
    PushChannel, ReconciliationController, Subscription, TaskState, TaskStatusUpdate,
};
use tracing::{debug, info};

/// Follows a single spec and logs its summary whenever the state changes.
pub struct SpecObserver {
    controller: Mutex<ReconciliationController>,
    changes: AtomicUsize,
}

impl SpecObserver {
    pub fn new(spec_name: &str) -> Self {
        Self {
            controller: Mutex::new(ReconciliationController::new(TaskState::empty(spec_name))),
            changes: AtomicUsize::new(0),
        }
    }

    fn controller(&self) -> MutexGuard<'_, ReconciliationController> {
        self.controller.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge a broadcast. Returns true if the reconciled state changed.
    pub fn observe(&self, update: &TaskStatusUpdate) -> bool {
        let mut controller = self.controller();
        let before = controller.state();
        let after = controller.merge_server_event(update);

        if Arc::ptr_eq(&before, &after) {
            debug!("No change for {}", controller.spec_name());
            return false;
        }
        self.changes.fetch_add(1, Ordering::Relaxed);
        info!("{}", after.summary());
        true
    }

    /// Subscribe to this spec's broadcasts. Dropping the subscription detaches.
    pub fn attach(self: &Arc<Self>, channel: &Arc<PushChannel>) -> Subscription {
        let weak = Arc::downgrade(self);
        let spec_name = self.controller().spec_name().to_string();
        channel.subscribe_spec(spec_name, move |update| {
            if let Some(observer) = weak.upgrade() {
                observer.observe(update);
            }
        })
    }

    pub fn state(&self) -> Arc<TaskState> {
        self.controller().state()
    }

    /// Number of broadcasts that changed the state.
    pub fn changes(&self) -> usize {
        self.changes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::{PushEvent, Task, TaskStatus, TaskSummary};

    fn update(spec: &str, status: TaskStatus) -> TaskStatusUpdate {
        TaskStatusUpdate {
            spec_name: spec.into(),
            task_list: vec![
                Task::new("1", "Login form", status),
                Task::new("2", "Session store", TaskStatus::Pending),
            ],
            summary: TaskSummary {
                total: 2,
                completed: None,
            },
            in_progress: None,
        }
    }

    #[test]
    fn test_only_real_changes_count() {
        let observer = SpecObserver::new("auth");

        assert!(observer.observe(&update("auth", TaskStatus::Pending)));
        assert!(!observer.observe(&update("auth", TaskStatus::Pending)));
        assert!(observer.observe(&update("auth", TaskStatus::Completed)));
        assert_eq!(observer.changes(), 2);

        let state = observer.state();
        assert_eq!(state.completed, 1);
        assert_eq!(state.total, 2);
    }

    #[test]
    fn test_attached_observer_ignores_other_specs() {
        let channel = Arc::new(PushChannel::new());
        let observer = Arc::new(SpecObserver::new("auth"));
        let sub = observer.attach(&channel);

        channel.emit(&PushEvent::TaskStatusUpdate(update("billing", TaskStatus::Completed)));
        assert_eq!(observer.changes(), 0);

        channel.emit(&PushEvent::TaskStatusUpdate(update("auth", TaskStatus::InProgress)));
        assert_eq!(observer.changes(), 1);
        assert_eq!(observer.state().in_progress.as_deref(), Some("1"));

        drop(sub);
        channel.emit(&PushEvent::TaskStatusUpdate(update("auth", TaskStatus::Completed)));
        assert_eq!(observer.changes(), 1);
    }
}
