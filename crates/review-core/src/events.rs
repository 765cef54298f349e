//! Push channel events and the observer list that fans them out.
//!
//! The dashboard backend broadcasts full task-list snapshots to every viewer.
//! `PushEvent` is the validated form of those payloads; `PushChannel` hands
//! them to subscribers, each of which holds a `Subscription` that unregisters
//! itself on drop.

use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::warn;

/// Envelope type for task status broadcasts.
pub const TASK_STATUS_UPDATE: &str = "task-status-update";

/// Summary block of a task status broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
}

/// Authoritative full-state broadcast for one spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdate {
    pub spec_name: String,
    pub task_list: Vec<Task>,
    #[serde(default)]
    pub summary: TaskSummary,
    #[serde(default)]
    pub in_progress: Option<String>,
}

/// A validated push channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    TaskStatusUpdate(TaskStatusUpdate),
    /// Well-formed envelope of a kind this core does not consume.
    Other { kind: String },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a TaskStatusUpdate,
}

impl PushEvent {
    /// Parse and validate a raw push message.
    ///
    /// Returns None for anything that is not a JSON envelope, or for a
    /// `task-status-update` whose payload does not match the schema.
    pub fn from_json(text: &str) -> Option<Self> {
        let envelope: RawEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring malformed push message: {}", e);
                return None;
            }
        };

        if envelope.kind != TASK_STATUS_UPDATE {
            return Some(PushEvent::Other {
                kind: envelope.kind,
            });
        }

        match serde_json::from_value::<TaskStatusUpdate>(envelope.data) {
            Ok(update) => Some(PushEvent::TaskStatusUpdate(update)),
            Err(e) => {
                warn!("Ignoring malformed {} payload: {}", TASK_STATUS_UPDATE, e);
                None
            }
        }
    }

    /// Encode a task status update in wire form.
    pub fn encode_update(update: &TaskStatusUpdate) -> String {
        let envelope = EnvelopeRef {
            kind: TASK_STATUS_UPDATE,
            data: update,
        };
        // Plain structs of strings and numbers cannot fail to serialize.
        serde_json::to_string(&envelope).unwrap_or_default()
    }

    /// The spec this event is scoped to, if any.
    pub fn spec_name(&self) -> Option<&str> {
        match self {
            PushEvent::TaskStatusUpdate(update) => Some(&update.spec_name),
            PushEvent::Other { .. } => None,
        }
    }
}

type Callback = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events; drop it to unsubscribe.
pub struct Subscription {
    channel: Weak<PushChannel>,
    id: usize,
}

impl Subscription {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unsubscribe(self.id);
        }
    }
}

/// Observer list for push events.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct PushChannel {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for PushChannel {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl PushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&PushEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            channel: Arc::downgrade(self),
            id,
        }
    }

    /// Subscribe to task status updates for a single spec.
    pub fn subscribe_spec(
        self: &Arc<Self>,
        spec_name: impl Into<String>,
        callback: impl Fn(&TaskStatusUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        let spec_name = spec_name.into();
        self.subscribe(move |event| {
            if let PushEvent::TaskStatusUpdate(update) = event {
                if update.spec_name == spec_name {
                    callback(update);
                }
            }
        })
    }

    fn unsubscribe(&self, id: usize) {
        // emit releases its read guard before invoking callbacks.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: &PushEvent) {
        // Snapshot the list so callbacks may subscribe or unsubscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}
