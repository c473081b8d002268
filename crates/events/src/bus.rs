//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the fire-and-forget progress channel for [`RunEvent`]s.
//! Publishing never blocks and never fails; subscribers that fall behind
//! lose the oldest events first. Shared via `Arc<EventBus>` across the
//! worker, the driver, and the progress monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrig_core::types::DbId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// The kind of progress event, in the order a healthy run emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// Task folder verified and the script header re-asserted.
    TaskPrepared,
    /// The attempt is underway. Always precedes any progress event.
    RunStarted,
    /// The external tool is open with the task's data file loaded.
    TaskReady,
    /// Observed output change or monitor heartbeat.
    RunProgress,
    /// Terminal: the attempt succeeded.
    RunCompleted,
    /// Terminal: the attempt failed.
    RunFailed,
}

/// A transient progress event for one run.
///
/// Delivered at most once per observed change and never persisted. The
/// durable run record is written separately by the worker's single
/// terminal commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_type: RunEventType,

    /// The run this event belongs to.
    pub run_id: DbId,

    /// Run status name at the time of the event (e.g. `"Running"`).
    pub status: String,

    /// Human-readable progress message.
    pub message: String,

    /// Artifact files currently visible, where the event type carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<usize>,

    /// Task folder path, on events announcing folder state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_dir: Option<String>,

    /// File name of a single artifact the event refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Create a new event with the required fields.
    ///
    /// The optional fields default to `None` and are attached with the
    /// builder methods below.
    pub fn new(
        event_type: RunEventType,
        run_id: DbId,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            run_id,
            status: status.into(),
            message: message.into(),
            image_count: None,
            task_dir: None,
            artifact: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the currently visible artifact count.
    pub fn with_image_count(mut self, count: usize) -> Self {
        self.image_count = Some(count);
        self
    }

    /// Attach the task folder path.
    pub fn with_task_dir(mut self, dir: impl Into<String>) -> Self {
        self.task_dir = Some(dir.into());
        self
    }

    /// Attach a single artifact file name.
    pub fn with_artifact(mut self, name: impl Into<String>) -> Self {
        self.artifact = Some(name.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for run progress.
///
/// Wraps a [`broadcast::Sender`] so any number of subscribers can
/// independently receive every published [`RunEvent`]. The channel is
/// bounded: when the buffer fills, the oldest unconsumed events are
/// dropped and slow receivers observe a `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers without blocking.
    ///
    /// With zero subscribers the event is silently dropped; progress is
    /// advisory and a run must never fail because nobody is listening.
    pub fn publish(&self, event: RunEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
