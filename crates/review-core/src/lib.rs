//! review-core: client-side state engine for the spec review dashboard.
//!
//! This crate provides the core functionality for:
//! - Reconciling optimistic task status edits with server broadcasts
//! - Listing document snapshots and diffing revisions
//! - Anchoring review comments to spans of the current text
//! - Keeping a source pane and its preview scrolled together
//! - The ReviewBackend trait the server side is consumed through

pub mod annotations;
pub mod backend;
pub mod diff;
pub mod events;
pub mod lifecycle;
pub mod reconcile;
pub mod scroll_sync;
pub mod snapshots;
pub mod task;

pub use annotations::{
    find_comment_for_highlight, to_spans, AnnotationSpan, Comment, CommentKind, CommentList,
    RenderedHighlight,
};
pub use backend::{BackendError, InMemoryBackend, ReviewBackend};
pub use diff::{compute_line_diff, has_diff_changes, DiffChunk, DiffLine, DiffLineType, DiffResult};
pub use events::{PushChannel, PushEvent, Subscription, TaskStatusUpdate, TaskSummary};
pub use lifecycle::{ActiveGuard, RequestTicket, RequestTracker, ViewLifecycle};
pub use reconcile::{ReconcileError, ReconciliationController, TaskSync, UpdateOutcome};
pub use scroll_sync::{Pane, PanePair, ScrollMetrics, ScrollSyncConfig, ScrollSynchronizer};
pub use snapshots::{
    DiffError, DiffOutcome, DiffPanel, DocumentSnapshot, Revision, SnapshotDiffClient,
    SnapshotTrigger,
};
pub use task::{Task, TaskState, TaskStatus};
