//! ReviewBackend trait for the dashboard server.
//!
//! The server owns tasks, snapshots and document content; this core only
//! consumes it. Implementations:
//! - `InMemoryBackend` - For testing and embedding

use crate::diff::{compute_line_diff, DiffResult};
use crate::events::{PushChannel, PushEvent, TaskStatusUpdate, TaskSummary};
use crate::snapshots::{DocumentSnapshot, Revision};
use crate::task::{Task, TaskState, TaskStatus};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Backend error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Server collaborators consumed by the review core.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    /// List every snapshot of a document (any order; callers sort).
    async fn list_snapshots(&self, document_id: &str) -> Result<Vec<DocumentSnapshot>>;

    /// Fetch the live content of a document.
    async fn fetch_current_content(&self, document_id: &str) -> Result<String>;

    /// Server-computed line diff between two revisions of a document.
    async fn fetch_diff(
        &self,
        document_id: &str,
        from: Revision,
        to: Revision,
    ) -> Result<DiffResult>;

    /// Submit a task status change. Success implies a broadcast will follow.
    async fn update_task_status(
        &self,
        spec_name: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()>;

    /// Full authoritative task list for a spec.
    async fn fetch_tasks(&self, spec_name: &str) -> Result<TaskStatusUpdate>;
}

/// A recorded `update_task_status` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    pub spec_name: String,
    pub task_id: String,
    pub status: TaskStatus,
}

/// In-memory backend for testing
pub struct InMemoryBackend {
    specs: RwLock<HashMap<String, Vec<Task>>>,
    documents: RwLock<HashMap<String, String>>,
    snapshots: RwLock<HashMap<String, Vec<DocumentSnapshot>>>,
    calls: RwLock<Vec<UpdateCall>>,
    fail_updates: AtomicBool,
    channel: Option<Arc<PushChannel>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            specs: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            fail_updates: AtomicBool::new(false),
            channel: None,
        }
    }

    /// Broadcast an authoritative event on `channel` after every successful update.
    pub fn with_channel(mut self, channel: Arc<PushChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn set_tasks(&self, spec_name: &str, tasks: Vec<Task>) {
        self.specs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec_name.to_string(), tasks);
    }

    pub fn set_content(&self, document_id: &str, content: &str) {
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(document_id.to_string(), content.to_string());
    }

    pub fn push_snapshot(&self, document_id: &str, snapshot: DocumentSnapshot) {
        self.snapshots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(document_id.to_string())
            .or_default()
            .push(snapshot);
    }

    /// Make every subsequent `update_task_status` fail (or succeed again).
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> Vec<UpdateCall> {
        self.calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current authoritative payload for a spec.
    pub fn snapshot_update(&self, spec_name: &str) -> Option<TaskStatusUpdate> {
        let specs = self.specs.read().unwrap_or_else(|e| e.into_inner());
        let tasks = specs.get(spec_name)?.clone();
        let state = TaskState::from_tasks(spec_name, tasks);
        Some(TaskStatusUpdate {
            spec_name: state.spec_name,
            summary: TaskSummary {
                total: state.total,
                completed: Some(state.completed),
            },
            in_progress: state.in_progress,
            task_list: state.tasks,
        })
    }

    fn revision_text(&self, document_id: &str, revision: Revision) -> Result<String> {
        let missing = || BackendError::NotFound(format!("{}@{}", document_id, revision));
        match revision {
            Revision::Current => self
                .documents
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(document_id)
                .cloned()
                .ok_or_else(missing),
            Revision::Version(version) => self
                .snapshots
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(document_id)
                .and_then(|list| list.iter().find(|s| s.version == version))
                .map(|s| s.content.clone())
                .ok_or_else(missing),
        }
    }

    /// Broadcast the current state of a spec, as the server would.
    pub fn broadcast(&self, spec_name: &str) {
        let Some(channel) = &self.channel else {
            return;
        };
        if let Some(update) = self.snapshot_update(spec_name) {
            debug!("Broadcasting {} for {}", crate::events::TASK_STATUS_UPDATE, spec_name);
            channel.emit(&PushEvent::TaskStatusUpdate(update));
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewBackend for InMemoryBackend {
    async fn list_snapshots(&self, document_id: &str) -> Result<Vec<DocumentSnapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
        Ok(snapshots.get(document_id).cloned().unwrap_or_default())
    }

    async fn fetch_current_content(&self, document_id: &str) -> Result<String> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(document_id.to_string()))
    }

    async fn fetch_diff(
        &self,
        document_id: &str,
        from: Revision,
        to: Revision,
    ) -> Result<DiffResult> {
        let old = self.revision_text(document_id, from)?;
        let new = self.revision_text(document_id, to)?;
        Ok(compute_line_diff(&old, &new))
    }

    async fn update_task_status(
        &self,
        spec_name: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        self.calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(UpdateCall {
                spec_name: spec_name.to_string(),
                task_id: task_id.to_string(),
                status,
            });

        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected(format!(
                "update of {}/{} refused",
                spec_name, task_id
            )));
        }

        {
            let mut specs = self.specs.write().unwrap_or_else(|e| e.into_inner());
            let tasks = specs
                .get_mut(spec_name)
                .ok_or_else(|| BackendError::NotFound(spec_name.to_string()))?;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| BackendError::NotFound(format!("{}/{}", spec_name, task_id)))?;
            *task = task.clone().with_status(status);
        }

        self.broadcast(spec_name);
        Ok(())
    }

    async fn fetch_tasks(&self, spec_name: &str) -> Result<TaskStatusUpdate> {
        self.snapshot_update(spec_name)
            .ok_or_else(|| BackendError::NotFound(spec_name.to_string()))
    }
}
