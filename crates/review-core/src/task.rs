//! Task data model for spec task lists.
//!
//! Tasks are owned by the server; the client only rewrites their status
//! optimistically. Aggregates (`completed`, `total`, `progress`, the
//! in-progress pointer) are always derived from the task list itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row as broadcast by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default, alias = "title")]
    pub description: String,
    /// Section headers are rendered in the list but never counted.
    #[serde(default)]
    pub is_header: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub in_progress: bool,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            status,
            description: description.into(),
            is_header: false,
            completed: false,
            in_progress: false,
        }
        .with_status(status)
    }

    pub fn header(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            is_header: true,
            ..Self::new(id, description, TaskStatus::Pending)
        }
    }

    /// Return a copy with `status` and the derived booleans rewritten together.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self.completed = status == TaskStatus::Completed;
        self.in_progress = status == TaskStatus::InProgress;
        self
    }

    /// Field-level comparison used for change detection.
    fn same_content(&self, other: &Task) -> bool {
        self.id == other.id
            && self.status == other.status
            && self.description == other.description
            && self.completed == other.completed
            && self.in_progress == other.in_progress
    }
}

/// Reconciled task list for one spec, with derived aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub spec_name: String,
    pub tasks: Vec<Task>,
    pub completed: usize,
    pub total: usize,
    pub progress: f64,
    pub in_progress: Option<String>,
}

impl TaskState {
    /// Build a state from a task list, deriving every aggregate.
    pub fn from_tasks(spec_name: impl Into<String>, tasks: Vec<Task>) -> Self {
        let mut completed = 0;
        let mut total = 0;
        let mut in_progress = None;

        for task in tasks.iter().filter(|t| !t.is_header) {
            total += 1;
            match task.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::InProgress if in_progress.is_none() => {
                    in_progress = Some(task.id.clone());
                }
                _ => {}
            }
        }

        let progress = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };

        Self {
            spec_name: spec_name.into(),
            tasks,
            completed,
            total,
            progress,
            in_progress,
        }
    }

    pub fn empty(spec_name: impl Into<String>) -> Self {
        Self::from_tasks(spec_name, Vec::new())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// True when both states would render identically.
    ///
    /// Tasks are paired by id (order-sensitive, since list order is part of
    /// the rendered output), then the top-level aggregates are compared.
    pub fn same_content(&self, other: &TaskState) -> bool {
        if self.tasks.len() != other.tasks.len() {
            return false;
        }
        let tasks_match = self
            .tasks
            .iter()
            .zip(other.tasks.iter())
            .all(|(a, b)| a.same_content(b));

        tasks_match
            && self.spec_name == other.spec_name
            && self.completed == other.completed
            && self.total == other.total
            && self.in_progress == other.in_progress
    }

    /// Index tasks by id.
    pub fn by_id(&self) -> HashMap<&str, &Task> {
        self.tasks.iter().map(|t| (t.id.as_str(), t)).collect()
    }

    /// One-line human summary, used for logging.
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} ({:.0}%) in progress: {}",
            self.spec_name,
            self.completed,
            self.total,
            self.progress * 100.0,
            self.in_progress.as_deref().unwrap_or("none")
        )
    }
}
