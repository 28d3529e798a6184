//! Applies the outcome of an analysis to the stored job.

use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::error::JobError;
use crate::model::{Alert, AnalysisResult};
use crate::store::{JobStore, TerminalWrite};

/// Result of one analysis attempt, after any failure policy was applied.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Success(AnalysisResult),
    /// Carries the user-facing message only.
    Failure(String),
}

/// What reconciliation did.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Completed { alert: Option<Alert> },
    Failed,
    /// Another writer got there first. Nothing was written.
    AlreadyTerminal,
    /// The job no longer exists.
    Missing,
}

/// Writes terminal job states and publishes the resulting events.
#[derive(Clone)]
pub struct Reconciler {
    jobs: JobStore,
    events: JobEventBroadcaster,
}

impl Reconciler {
    pub fn new(jobs: JobStore, events: JobEventBroadcaster) -> Self {
        Self { jobs, events }
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    /// Moves the job to its terminal state exactly once.
    ///
    /// A second call for the same job reports `AlreadyTerminal` and creates
    /// no alert.
    #[tracing::instrument(name = "reconcile", skip(self, outcome), fields(job_id = %job_id))]
    pub fn apply(&self, job_id: &str, outcome: AnalysisOutcome) -> Result<ReconcileOutcome, JobError> {
        let write = match &outcome {
            AnalysisOutcome::Success(result) => self.jobs.complete(job_id, result)?,
            AnalysisOutcome::Failure(message) => self.jobs.fail(job_id, message)?,
        };

        let (job, alert) = match write {
            TerminalWrite::Applied { job, alert } => (job, alert),
            TerminalWrite::AlreadyTerminal => {
                tracing::info!("Job already terminal, ignoring duplicate outcome");
                return Ok(ReconcileOutcome::AlreadyTerminal);
            }
            TerminalWrite::Missing => {
                tracing::warn!("Job vanished before its outcome could be stored");
                return Ok(ReconcileOutcome::Missing);
            }
        };

        match outcome {
            AnalysisOutcome::Success(result) => {
                tracing::info!(
                    fall_detected = result.fall_detected,
                    confidence = result.confidence,
                    simulated = result.is_simulated,
                    "Analysis completed"
                );
                self.events.send(JobEvent::completed(
                    &job.id,
                    &job.owner_id,
                    result.fall_detected,
                    result.confidence,
                    result.is_simulated,
                ));
                if let Some(ref alert) = alert {
                    tracing::info!(alert_id = %alert.id, "Fall alert raised");
                    self.events.send(JobEvent::alert_created(
                        &job.id,
                        &job.owner_id,
                        &alert.id,
                        alert.severity,
                    ));
                }
                Ok(ReconcileOutcome::Completed { alert })
            }
            AnalysisOutcome::Failure(message) => {
                tracing::info!(error = %message, "Analysis failed");
                self.events
                    .send(JobEvent::failed(&job.id, &job.owner_id, &message));
                Ok(ReconcileOutcome::Failed)
            }
        }
    }
}
