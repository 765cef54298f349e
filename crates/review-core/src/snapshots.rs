//! Snapshot listing and revision diffs for a document under review.
//!
//! A `SnapshotDiffClient` belongs to one review session. Snapshots are
//! fetched lazily and cached for the session; diffs are computed fresh for
//! every selection change. Responses that arrive after a newer selection, or
//! after the session is closed, are dropped without touching the panel.

use crate::backend::{BackendError, ReviewBackend};
use crate::diff::{compute_line_diff, DiffResult};
use crate::lifecycle::{RequestTracker, ViewLifecycle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Diff unavailable: document {0} has no snapshots")]
    Unavailable(String),

    #[error("Unknown version {version} of {document_id}")]
    UnknownVersion { document_id: String, version: u64 },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, DiffError>;

/// Why the server captured a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Initial,
    RevisionRequested,
    Approved,
    Rejected,
    Manual,
    #[serde(other)]
    Unknown,
}

/// Immutable, versioned capture of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub trigger: SnapshotTrigger,
    pub content: String,
}

impl DocumentSnapshot {
    pub fn new(version: u64, trigger: SnapshotTrigger, content: impl Into<String>) -> Self {
        Self {
            version,
            timestamp: Utc::now(),
            trigger,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid revision {0:?}: expected a version number or \"current\"")]
pub struct RevisionParseError(String);

/// One endpoint of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    Version(u64),
    /// The live document as the server holds it now.
    Current,
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Version(v) => write!(f, "{}", v),
            Revision::Current => f.write_str("current"),
        }
    }
}

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("current") {
            return Ok(Revision::Current);
        }
        trimmed
            .parse::<u64>()
            .map(Revision::Version)
            .map_err(|_| RevisionParseError(s.to_string()))
    }
}

impl Serialize for Revision {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What the diff panel should show.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffPanel {
    /// No snapshots (or not loaded yet): diff mode is off.
    Unavailable,
    /// Snapshots loaded, nothing compared yet.
    Idle,
    Loading,
    Ready(Arc<DiffResult>),
    Failed(String),
}

/// Result of a diff request.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    Applied(Arc<DiffResult>),
    /// Superseded by a newer selection or a closed session; nothing changed.
    Stale,
}

struct Session {
    snapshots: Option<Arc<[DocumentSnapshot]>>,
    selection: Option<(Revision, Revision)>,
    panel: DiffPanel,
    requests: RequestTracker,
    lifecycle: ViewLifecycle,
}

/// Snapshot and diff access for one document review session.
pub struct SnapshotDiffClient<B: ReviewBackend> {
    backend: Arc<B>,
    document_id: String,
    session: Mutex<Session>,
}

impl<B: ReviewBackend> SnapshotDiffClient<B> {
    pub fn new(backend: Arc<B>, document_id: impl Into<String>) -> Self {
        Self {
            backend,
            document_id: document_id.into(),
            session: Mutex::new(Session {
                snapshots: None,
                selection: None,
                panel: DiffPanel::Unavailable,
                requests: RequestTracker::new(),
                lifecycle: ViewLifecycle::new(),
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Snapshots in ascending version order, fetched once per session.
    pub async fn list_snapshots(&self) -> Result<Arc<[DocumentSnapshot]>> {
        let cached = self.session().snapshots.clone();
        if let Some(snapshots) = cached {
            return Ok(snapshots);
        }

        let guard = self.session().lifecycle.guard();
        let fetched = self.backend.list_snapshots(&self.document_id).await;
        let mut session = self.session();

        match fetched {
            Ok(mut snapshots) => {
                snapshots.sort_by_key(|s| s.version);
                let snapshots: Arc<[DocumentSnapshot]> = snapshots.into();
                if guard.is_active() {
                    session.snapshots = Some(Arc::clone(&snapshots));
                    session.panel = if snapshots.is_empty() {
                        DiffPanel::Unavailable
                    } else {
                        DiffPanel::Idle
                    };
                }
                debug!(
                    "Loaded {} snapshot(s) for {}",
                    snapshots.len(),
                    self.document_id
                );
                Ok(snapshots)
            }
            Err(e) => {
                if guard.is_active() {
                    session.panel = DiffPanel::Failed(e.to_string());
                }
                Err(e.into())
            }
        }
    }

    /// Drop the cached snapshot list so the next call refetches it.
    pub fn invalidate_snapshots(&self) {
        self.session().snapshots = None;
    }

    /// True once snapshots are loaded and at least one exists.
    pub fn diff_available(&self) -> bool {
        matches!(&self.session().snapshots, Some(s) if !s.is_empty())
    }

    /// Latest snapshot against the live document, when diff mode is available.
    pub fn default_selection(&self) -> Option<(Revision, Revision)> {
        let session = self.session();
        let latest = session.snapshots.as_ref()?.last()?.version;
        Some((Revision::Version(latest), Revision::Current))
    }

    pub fn selection(&self) -> Option<(Revision, Revision)> {
        self.session().selection
    }

    pub fn panel(&self) -> DiffPanel {
        self.session().panel.clone()
    }

    /// Compare two revisions and publish the result to the panel.
    ///
    /// Loads the snapshot list first if this session has not seen it yet.
    /// Every call supersedes earlier in-flight calls: their responses come
    /// back as `DiffOutcome::Stale`.
    pub async fn compute_diff(&self, from: Revision, to: Revision) -> Result<DiffOutcome> {
        if !self.session().lifecycle.is_open() {
            return Ok(DiffOutcome::Stale);
        }
        let snapshots = self.list_snapshots().await?;
        if snapshots.is_empty() {
            return Err(DiffError::Unavailable(self.document_id.clone()));
        }

        let (ticket, guard, same_text) = {
            let mut session = self.session();
            if !session.lifecycle.is_open() {
                return Ok(DiffOutcome::Stale);
            }
            let from_text = self.snapshot_text(&snapshots, from)?;
            self.snapshot_text(&snapshots, to)?;

            session.selection = Some((from, to));
            session.panel = DiffPanel::Loading;
            (
                session.requests.begin(),
                session.lifecycle.guard(),
                from_text,
            )
        };

        // A revision against itself needs only its text; anything else is
        // diffed by the server.
        let computed = if from == to {
            self.resolve(same_text)
                .await
                .map(|text| compute_line_diff(&text, &text))
        } else {
            self.backend
                .fetch_diff(&self.document_id, from, to)
                .await
                .map_err(DiffError::from)
        };

        let mut session = self.session();
        if !guard.is_active() || !session.requests.is_current(ticket) {
            debug!(
                "Discarding stale diff {}..{} for {}",
                from, to, self.document_id
            );
            return Ok(DiffOutcome::Stale);
        }

        match computed {
            Ok(diff) => {
                let diff = Arc::new(diff);
                session.panel = DiffPanel::Ready(Arc::clone(&diff));
                Ok(DiffOutcome::Applied(diff))
            }
            Err(e) => {
                session.panel = DiffPanel::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Text of a stored version, or None for the live document.
    fn snapshot_text(
        &self,
        snapshots: &[DocumentSnapshot],
        revision: Revision,
    ) -> Result<Option<String>> {
        match revision {
            Revision::Current => Ok(None),
            Revision::Version(version) => snapshots
                .iter()
                .find(|s| s.version == version)
                .map(|s| Some(s.content.clone()))
                .ok_or_else(|| DiffError::UnknownVersion {
                    document_id: self.document_id.clone(),
                    version,
                }),
        }
    }

    async fn resolve(&self, stored: Option<String>) -> Result<String> {
        match stored {
            Some(text) => Ok(text),
            None => Ok(self
                .backend
                .fetch_current_content(&self.document_id)
                .await?),
        }
    }

    /// End the session: in-flight responses are discarded from now on.
    pub fn close(&self) {
        let mut session = self.session();
        session.lifecycle.close();
        session.requests.invalidate();
    }
}
