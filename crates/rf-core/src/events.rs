//! Job event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late-joining listeners can catch up.
//! The video poller publishes its out-of-band completion here, which is the
//! push counterpart to polling the job store.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;
use crate::job::StageId;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
    },
    JobStarted {
        job_id: JobId,
    },
    JobStageCompleted {
        job_id: JobId,
        stage: StageId,
        progress: f32,
    },
    JobVideoProcessing {
        job_id: JobId,
        operation: String,
    },
    JobCompleted {
        job_id: JobId,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobUrlsRefreshed {
        job_id: JobId,
        refreshed: usize,
    },
}

impl EventPayload {
    /// The job this event concerns.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobQueued { job_id }
            | Self::JobStarted { job_id }
            | Self::JobStageCompleted { job_id, .. }
            | Self::JobVideoProcessing { job_id, .. }
            | Self::JobCompleted { job_id }
            | Self::JobFailed { job_id, .. }
            | Self::JobUrlsRefreshed { job_id, .. } => *job_id,
        }
    }
}

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn publish(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Recent events for a single job (newest first).
    pub fn recent_for_job(&self, job_id: JobId) -> Vec<Event> {
        let recent = self.recent.read();
        recent
            .iter()
            .filter(|e| e.payload.job_id() == job_id)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
