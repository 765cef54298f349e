//! Reconciliation of optimistic task edits with server broadcasts.
//!
//! Two sources mutate a spec's task list:
//!
//! 1. Local status changes, applied immediately and sent to the backend
//! 2. Full-state `task-status-update` broadcasts from the server
//!
//! For any task id with an unresolved local intent, the local value wins over
//! every broadcast until the intent's own request succeeds or fails. Once
//! resolved, the next broadcast is adopted as-is. Intents on different task
//! ids never interact.
//!
//! Intents carry a sequence number. A resolution only clears the pending
//! entry if it belongs to the newest intent for that task, so a slow failure
//! of an older request cannot clobber a newer optimistic value.
//!
//! Each pending task also remembers its last authoritative value. Rejecting
//! the newest intent puts that value back, so a rejected status is never
//! shown again even if the follow-up refetch fails.

use crate::backend::{BackendError, ReviewBackend};
use crate::events::{PushChannel, PushEvent, Subscription, TaskStatusUpdate};
use crate::lifecycle::{ActiveGuard, ViewLifecycle};
use crate::task::{Task, TaskState, TaskStatus};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task {0} is a section header and has no status")]
    HeaderTask(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// An optimistic status change that has been applied locally but not resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub task_id: String,
    pub seq: u64,
    pub status: TaskStatus,
}

/// How an optimistic update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Backend accepted the change; the local value stays.
    Confirmed,
    /// Backend refused the change; state was refetched.
    RolledBack,
    /// The view was torn down before the response arrived.
    Discarded,
}

#[derive(Debug)]
struct PendingEntry {
    seq: u64,
    /// Last value for the task that did not come from a local intent.
    baseline: Task,
}

/// Synchronous reconciliation state for one spec.
///
/// Owns the reconciled `TaskState` and the pending-intent map. All mutation
/// goes through `begin_update`, `confirm`/`reject`, `merge_server_event` and
/// `apply_refetch`.
#[derive(Debug)]
pub struct ReconciliationController {
    spec_name: String,
    state: Arc<TaskState>,
    /// task id -> newest unresolved intent
    pending: HashMap<String, PendingEntry>,
    next_seq: u64,
}

impl ReconciliationController {
    pub fn new(initial: TaskState) -> Self {
        Self {
            spec_name: initial.spec_name.clone(),
            state: Arc::new(initial),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn spec_name(&self) -> &str {
        &self.spec_name
    }

    pub fn state(&self) -> Arc<TaskState> {
        Arc::clone(&self.state)
    }

    /// Ids of tasks with an unresolved local intent.
    pub fn pending_intents(&self) -> BTreeSet<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn is_pending(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id)
    }

    /// Apply a status change locally and record it as pending.
    ///
    /// The caller is expected to dispatch the change to the backend and then
    /// call `confirm` or `reject` with the returned intent.
    pub fn begin_update(&mut self, task_id: &str, status: TaskStatus) -> Result<PendingIntent> {
        let index = self
            .state
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| ReconcileError::UnknownTask(task_id.to_string()))?;

        if self.state.tasks[index].is_header {
            return Err(ReconcileError::HeaderTask(task_id.to_string()));
        }

        let mut tasks = self.state.tasks.clone();
        let current = tasks[index].clone();
        tasks[index] = current.clone().with_status(status);
        self.state = Arc::new(TaskState::from_tasks(self.spec_name.clone(), tasks));

        self.next_seq += 1;
        let seq = self.next_seq;
        let baseline = match self.pending.remove(task_id) {
            Some(superseded) => {
                debug!(
                    "Intent #{} on {} supersedes unresolved intent #{}",
                    seq, task_id, superseded.seq
                );
                superseded.baseline
            }
            None => current,
        };
        self.pending
            .insert(task_id.to_string(), PendingEntry { seq, baseline });

        Ok(PendingIntent {
            task_id: task_id.to_string(),
            seq,
            status,
        })
    }

    /// Mark an intent as accepted by the backend.
    ///
    /// Returns false if a newer intent for the same task is still pending.
    pub fn confirm(&mut self, intent: &PendingIntent) -> bool {
        let cleared = self.resolve(intent).is_some();
        if !cleared {
            debug!(
                "Confirmation of intent #{} on {} is stale, newer intent still pending",
                intent.seq, intent.task_id
            );
        }
        cleared
    }

    /// Mark an intent as refused by the backend.
    ///
    /// The task goes back to its last authoritative value. The caller must
    /// still refetch and hand the result to `apply_refetch`.
    /// Returns false if a newer intent for the same task is still pending;
    /// that intent keeps dominating the refetched state.
    pub fn reject(&mut self, intent: &PendingIntent) -> bool {
        let resolved = self.resolve(intent);
        let cleared = resolved.is_some();
        if let Some(entry) = resolved {
            self.restore(entry.baseline);
        }
        warn!(
            "Intent #{} ({} -> {}) rejected{}",
            intent.seq,
            intent.task_id,
            intent.status,
            if cleared { "" } else { " (superseded)" }
        );
        cleared
    }

    fn resolve(&mut self, intent: &PendingIntent) -> Option<PendingEntry> {
        match self.pending.get(&intent.task_id) {
            Some(entry) if entry.seq == intent.seq => self.pending.remove(&intent.task_id),
            _ => None,
        }
    }

    fn restore(&mut self, baseline: Task) {
        let Some(index) = self.state.tasks.iter().position(|t| t.id == baseline.id) else {
            return;
        };
        if self.state.tasks[index] == baseline {
            return;
        }
        let mut tasks = self.state.tasks.clone();
        tasks[index] = baseline;
        self.state = Arc::new(TaskState::from_tasks(self.spec_name.clone(), tasks));
    }

    /// Merge an authoritative broadcast into the local state.
    ///
    /// Tasks with a pending intent keep their local value; everything else is
    /// taken from the server. Aggregates are always recomputed from the merged
    /// list. If nothing observable changed, the previous `Arc` is returned so
    /// callers can skip work with `Arc::ptr_eq`.
    pub fn merge_server_event(&mut self, update: &TaskStatusUpdate) -> Arc<TaskState> {
        if update.spec_name != self.spec_name {
            debug!(
                "Ignoring broadcast for {} (viewing {})",
                update.spec_name, self.spec_name
            );
            return self.state();
        }

        let previous = self.state.by_id();
        let mut overridden = 0usize;
        let mut tasks = Vec::with_capacity(update.task_list.len());
        for incoming in &update.task_list {
            let local = previous.get(incoming.id.as_str());
            match (self.pending.get_mut(&incoming.id), local) {
                (Some(entry), Some(local)) => {
                    if local.status != incoming.status {
                        debug!(
                            "Keeping local {} for {} over broadcast {}",
                            local.status, incoming.id, incoming.status
                        );
                    }
                    entry.baseline = incoming.clone();
                    overridden += 1;
                    tasks.push((*local).clone());
                }
                _ => tasks.push(incoming.clone()),
            }
        }

        let merged = TaskState::from_tasks(self.spec_name.clone(), tasks);
        if overridden == 0 && merged.total != update.summary.total {
            debug!(
                "Broadcast summary total {} disagrees with task list ({}), using task list",
                update.summary.total, merged.total
            );
        }

        if merged.same_content(&self.state) {
            return self.state();
        }

        self.state = Arc::new(merged);
        self.state()
    }

    /// Adopt a full refetch after a rejected intent.
    ///
    /// Goes through the same rules as a broadcast, so intents that are still
    /// pending (on other tasks, or newer ones on the same task) survive.
    pub fn apply_refetch(&mut self, update: &TaskStatusUpdate) -> Arc<TaskState> {
        self.merge_server_event(update)
    }
}

/// Async driver around a `ReconciliationController`.
///
/// Dispatches optimistic updates to the backend and applies push events. The
/// controller lock is never held across an `.await`, so broadcasts delivered
/// while a request is in flight are merged immediately.
pub struct TaskSync<B: ReviewBackend> {
    backend: Arc<B>,
    controller: Mutex<ReconciliationController>,
    lifecycle: Mutex<ViewLifecycle>,
}

impl<B: ReviewBackend + 'static> TaskSync<B> {
    pub fn new(backend: Arc<B>, initial: TaskState) -> Self {
        Self {
            backend,
            controller: Mutex::new(ReconciliationController::new(initial)),
            lifecycle: Mutex::new(ViewLifecycle::new()),
        }
    }

    /// Start from the server's current task list for `spec_name`.
    pub async fn load(backend: Arc<B>, spec_name: &str) -> Result<Self> {
        let update = backend.fetch_tasks(spec_name).await?;
        let initial = TaskState::from_tasks(spec_name, update.task_list);
        Ok(Self::new(backend, initial))
    }

    fn controller(&self) -> MutexGuard<'_, ReconciliationController> {
        self.controller.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guard(&self) -> ActiveGuard {
        self.lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .guard()
    }

    pub fn state(&self) -> Arc<TaskState> {
        self.controller().state()
    }

    pub fn pending_intents(&self) -> BTreeSet<String> {
        self.controller().pending_intents()
    }

    /// Apply a status change locally, send it, and settle the outcome.
    ///
    /// On failure the pending intent is dropped and the full task list is
    /// refetched. Responses arriving after `close` are discarded.
    pub async fn apply_optimistic_update(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<UpdateOutcome> {
        let guard = self.guard();
        let (intent, spec_name) = {
            let mut controller = self.controller();
            let intent = controller.begin_update(task_id, status)?;
            (intent, controller.spec_name().to_string())
        };

        let sent = self
            .backend
            .update_task_status(&spec_name, task_id, status)
            .await;

        if !guard.is_active() {
            debug!("Discarding update response for {} after teardown", task_id);
            return Ok(UpdateOutcome::Discarded);
        }

        match sent {
            Ok(()) => {
                self.controller().confirm(&intent);
                Ok(UpdateOutcome::Confirmed)
            }
            Err(e) => {
                warn!("Status update for {} failed: {}, refetching", task_id, e);
                self.controller().reject(&intent);

                let update = match self.backend.fetch_tasks(&spec_name).await {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Refetch of {} failed: {}", spec_name, e);
                        return Err(e.into());
                    }
                };
                if !guard.is_active() {
                    debug!("Discarding refetch for {} after teardown", spec_name);
                    return Ok(UpdateOutcome::Discarded);
                }
                self.controller().apply_refetch(&update);
                Ok(UpdateOutcome::RolledBack)
            }
        }
    }

    /// Merge a push event. Returns the resulting state for task updates.
    pub fn handle_push(&self, event: &PushEvent) -> Option<Arc<TaskState>> {
        match event {
            PushEvent::TaskStatusUpdate(update) => self.merge(update),
            PushEvent::Other { .. } => None,
        }
    }

    fn merge(&self, update: &TaskStatusUpdate) -> Option<Arc<TaskState>> {
        if !self.guard().is_active() {
            return None;
        }
        Some(self.controller().merge_server_event(update))
    }

    /// Subscribe to broadcasts for this spec. Dropping the subscription detaches.
    pub fn attach(self: &Arc<Self>, channel: &Arc<PushChannel>) -> Subscription {
        let weak = Arc::downgrade(self);
        let spec_name = self.controller().spec_name().to_string();
        channel.subscribe_spec(spec_name, move |update| {
            if let Some(sync) = weak.upgrade() {
                sync.merge(update);
            }
        })
    }

    /// Tear down: in-flight responses and later broadcasts are ignored.
    pub fn close(&self) {
        self.lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TaskSummary;

    fn tasks(statuses: &[(&str, TaskStatus)]) -> Vec<Task> {
        statuses
            .iter()
            .map(|(id, status)| Task::new(*id, format!("Task {}", id), *status))
            .collect()
    }

    fn broadcast(statuses: &[(&str, TaskStatus)]) -> TaskStatusUpdate {
        let task_list = tasks(statuses);
        TaskStatusUpdate {
            spec_name: "auth".into(),
            summary: TaskSummary {
                total: task_list.len(),
                completed: None,
            },
            in_progress: None,
            task_list,
        }
    }

    fn controller(statuses: &[(&str, TaskStatus)]) -> ReconciliationController {
        ReconciliationController::new(TaskState::from_tasks("auth", tasks(statuses)))
    }

    #[test]
    fn test_begin_update_is_applied_immediately() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        c.begin_update("1", TaskStatus::InProgress).unwrap();

        let state = c.state();
        assert_eq!(state.task("1").unwrap().status, TaskStatus::InProgress);
        assert!(state.task("1").unwrap().in_progress);
        assert_eq!(state.in_progress.as_deref(), Some("1"));
        assert_eq!(c.pending_intents(), BTreeSet::from(["1".to_string()]));
    }

    #[test]
    fn test_pending_intent_dominates_broadcast() {
        let mut c = controller(&[("1", TaskStatus::Pending), ("2", TaskStatus::Pending)]);
        c.begin_update("1", TaskStatus::InProgress).unwrap();

        let merged = c.merge_server_event(&broadcast(&[
            ("1", TaskStatus::Pending),
            ("2", TaskStatus::Completed),
        ]));

        assert_eq!(merged.task("1").unwrap().status, TaskStatus::InProgress);
        assert_eq!(merged.task("2").unwrap().status, TaskStatus::Completed);
        assert_eq!(merged.completed, 1);
        assert_eq!(merged.in_progress.as_deref(), Some("1"));
    }

    #[test]
    fn test_confirmed_intent_converges_to_server() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let intent = c.begin_update("1", TaskStatus::InProgress).unwrap();
        assert!(c.confirm(&intent));
        assert!(c.pending_intents().is_empty());

        let merged = c.merge_server_event(&broadcast(&[("1", TaskStatus::Completed)]));
        assert_eq!(merged.task("1").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_identical_broadcast_keeps_reference() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let event = broadcast(&[("1", TaskStatus::Completed)]);

        let first = c.merge_server_event(&event);
        let second = c.merge_server_event(&event);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_broadcast_matching_local_state_keeps_reference() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let before = c.state();
        let after = c.merge_server_event(&broadcast(&[("1", TaskStatus::Pending)]));
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_other_spec_is_ignored() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let before = c.state();
        let mut event = broadcast(&[("1", TaskStatus::Completed)]);
        event.spec_name = "billing".into();

        let after = c.merge_server_event(&event);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_stale_rejection_does_not_clear_newer_intent() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let first = c.begin_update("1", TaskStatus::InProgress).unwrap();
        let second = c.begin_update("1", TaskStatus::Completed).unwrap();

        assert!(!c.reject(&first));
        assert!(c.is_pending("1"));

        // The refetch demanded by the failed first intent must not undo the second.
        let refetched = c.apply_refetch(&broadcast(&[("1", TaskStatus::Pending)]));
        assert_eq!(refetched.task("1").unwrap().status, TaskStatus::Completed);

        assert!(c.confirm(&second));
        assert!(c.pending_intents().is_empty());
    }

    #[test]
    fn test_rejection_then_refetch_reverts() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let intent = c.begin_update("1", TaskStatus::InProgress).unwrap();
        assert!(c.reject(&intent));

        let state = c.apply_refetch(&broadcast(&[("1", TaskStatus::Pending)]));
        assert_eq!(state.task("1").unwrap().status, TaskStatus::Pending);
        assert!(state.in_progress.is_none());
    }

    #[test]
    fn test_rejection_restores_last_server_value() {
        let mut c = controller(&[("1", TaskStatus::Pending), ("2", TaskStatus::Pending)]);
        let first = c.begin_update("1", TaskStatus::InProgress).unwrap();
        let second = c.begin_update("1", TaskStatus::Completed).unwrap();

        // A broadcast while pending moves the baseline to the server's value.
        c.merge_server_event(&broadcast(&[
            ("1", TaskStatus::InProgress),
            ("2", TaskStatus::Completed),
        ]));
        assert_eq!(c.state().task("1").unwrap().status, TaskStatus::Completed);

        assert!(!c.reject(&first));
        assert_eq!(c.state().task("1").unwrap().status, TaskStatus::Completed);

        assert!(c.reject(&second));
        let state = c.state();
        assert_eq!(state.task("1").unwrap().status, TaskStatus::InProgress);
        assert_eq!(state.in_progress.as_deref(), Some("1"));
        assert_eq!(state.completed, 1);
        assert!(c.pending_intents().is_empty());
    }

    #[test]
    fn test_rejection_without_broadcast_restores_initial_value() {
        let mut c = controller(&[("1", TaskStatus::Pending)]);
        let intent = c.begin_update("1", TaskStatus::InProgress).unwrap();
        assert!(c.reject(&intent));

        let state = c.state();
        assert_eq!(state.task("1").unwrap().status, TaskStatus::Pending);
        assert!(state.in_progress.is_none());
    }

    #[tokio::test]
    async fn test_failed_refetch_leaves_pre_intent_state() {
        use crate::backend::InMemoryBackend;

        // No stored spec, so the refetch after the rejection fails too.
        let backend = InMemoryBackend::new();
        backend.set_fail_updates(true);
        let sync = TaskSync::new(
            Arc::new(backend),
            TaskState::from_tasks("auth", tasks(&[("1", TaskStatus::Pending)])),
        );

        let result = sync.apply_optimistic_update("1", TaskStatus::InProgress).await;
        assert!(matches!(
            result,
            Err(ReconcileError::Backend(BackendError::NotFound(_)))
        ));

        let state = sync.state();
        assert_eq!(state.task("1").unwrap().status, TaskStatus::Pending);
        assert!(state.in_progress.is_none());
        assert!(sync.pending_intents().is_empty());
    }

    #[test]
    fn test_unknown_and_header_tasks_are_refused() {
        let mut c = ReconciliationController::new(TaskState::from_tasks(
            "auth",
            vec![Task::header("h", "Setup"), Task::new("1", "x", TaskStatus::Pending)],
        ));

        assert!(matches!(
            c.begin_update("9", TaskStatus::Completed),
            Err(ReconcileError::UnknownTask(_))
        ));
        assert!(matches!(
            c.begin_update("h", TaskStatus::Completed),
            Err(ReconcileError::HeaderTask(_))
        ));
        assert!(c.pending_intents().is_empty());
    }

    #[test]
    fn test_aggregates_recomputed_when_overridden() {
        let mut c = controller(&[("1", TaskStatus::Pending), ("2", TaskStatus::Pending)]);
        c.begin_update("1", TaskStatus::Completed).unwrap();

        let mut event = broadcast(&[("1", TaskStatus::Pending), ("2", TaskStatus::Pending)]);
        event.summary.completed = Some(0);
        event.in_progress = Some("2".into());

        let merged = c.merge_server_event(&event);
        assert_eq!(merged.completed, 1);
        assert_eq!(merged.total, 2);
        assert!((merged.progress - 0.5).abs() < f64::EPSILON);
        assert!(merged.in_progress.is_none());
    }
}
