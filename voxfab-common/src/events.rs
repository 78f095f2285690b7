//! Event system for VoxFab services
//!
//! Session events are broadcast through the EventBus and serialized for SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// VoxFab session event types
///
/// Every committed transition of the model registry, the artifact session
/// or the dataset collector emits exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VoxEvent {
    /// A model became the active model
    ModelActivated {
        folder_name: String,
        /// false when the model was served from the cache
        freshly_loaded: bool,
        timestamp: DateTime<Utc>,
    },

    /// A new artifact was synthesized; offsets were reset
    ArtifactGenerated {
        generation: u64,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// The current artifact was cropped to `[start, end)` seconds
    ArtifactCropped {
        generation: u64,
        start: f64,
        end: f64,
        timestamp: DateTime<Utc>,
    },

    /// Pitch or speed was re-applied to the cropped baseline
    ArtifactAdjusted {
        generation: u64,
        pitch_offset: f64,
        speed_factor: f64,
        timestamp: DateTime<Utc>,
    },

    /// The current artifact was restored from the backup
    ArtifactReset {
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// A take was committed to a model's dataset
    TakeKept {
        model_name: String,
        filename: String,
        timestamp: DateTime<Utc>,
    },
}

impl VoxEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VoxEvent::ModelActivated { .. } => "ModelActivated",
            VoxEvent::ArtifactGenerated { .. } => "ArtifactGenerated",
            VoxEvent::ArtifactCropped { .. } => "ArtifactCropped",
            VoxEvent::ArtifactAdjusted { .. } => "ArtifactAdjusted",
            VoxEvent::ArtifactReset { .. } => "ArtifactReset",
            VoxEvent::TakeKept { .. } => "TakeKept",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks on slow
/// subscribers, and lagging subscribers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VoxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VoxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: VoxEvent) -> Result<usize, broadcast::error::SendError<VoxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: VoxEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
