//! Job event broadcaster for real-time fan-out of analysis outcomes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{AlertStatus, JobStatus, Severity};

/// Default channel capacity. Slow subscribers lag and skip older events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a job.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// A job was accepted and analysis scheduled.
    Submitted,
    /// Analysis finished with a result.
    Completed { fall_detected: bool, confidence: f64, is_simulated: bool },
    /// Analysis failed. Carries the user-facing message only.
    Failed { error: String },
    /// An alert was raised for the job.
    AlertCreated {
        alert_id: String,
        severity: Severity,
        status: AlertStatus,
    },
}

/// An event about one analysis job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub owner_id: String,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    fn new(job_id: &str, owner_id: &str, kind: JobEventKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            owner_id: owner_id.to_string(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Creates a submission event.
    pub fn submitted(job_id: &str, owner_id: &str) -> Self {
        Self::new(job_id, owner_id, JobEventKind::Submitted)
    }

    /// Creates a completion event.
    pub fn completed(
        job_id: &str,
        owner_id: &str,
        fall_detected: bool,
        confidence: f64,
        is_simulated: bool,
    ) -> Self {
        Self::new(
            job_id,
            owner_id,
            JobEventKind::Completed {
                fall_detected,
                confidence,
                is_simulated,
            },
        )
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, owner_id: &str, error: &str) -> Self {
        Self::new(
            job_id,
            owner_id,
            JobEventKind::Failed {
                error: error.to_string(),
            },
        )
    }

    /// Creates an alert event.
    pub fn alert_created(job_id: &str, owner_id: &str, alert_id: &str, severity: Severity) -> Self {
        Self::new(
            job_id,
            owner_id,
            JobEventKind::AlertCreated {
                alert_id: alert_id.to_string(),
                severity,
                status: AlertStatus::Active,
            },
        )
    }

    /// Terminal status this event reports, if any.
    pub fn status(&self) -> Option<JobStatus> {
        match self.kind {
            JobEventKind::Completed { .. } => Some(JobStatus::Completed),
            JobEventKind::Failed { .. } => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Broadcasts job events to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
