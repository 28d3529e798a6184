//! Periodic sweep that fails jobs stuck in `processing`.
//!
//! A job can be left in `processing` when the server stops mid-analysis.
//! The grace period is longer than the inference timeout, so a job whose
//! analysis is still running is never touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::reconcile::{AnalysisOutcome, ReconcileOutcome, Reconciler};
use crate::config::ReaperConfig;
use crate::error::JobError;
use crate::store::JobStore;

/// Stored on jobs failed by the reaper.
pub const STALE_JOB_MESSAGE: &str = "Analysis did not finish";

/// Fails stale `processing` jobs on start and then every interval.
pub struct StaleJobReaper {
    jobs: JobStore,
    reconciler: Reconciler,
    interval: Duration,
    grace: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StaleJobReaper {
    pub fn new(jobs: JobStore, reconciler: Reconciler, interval: Duration, grace: Duration) -> Self {
        Self {
            jobs,
            reconciler,
            interval,
            grace,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(jobs: JobStore, reconciler: Reconciler, config: &ReaperConfig) -> Self {
        Self::new(
            jobs,
            reconciler,
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.grace_secs),
        )
    }

    /// Fails every `processing` job untouched for longer than the grace
    /// period. Returns how many jobs were failed.
    pub fn sweep(&self) -> Result<usize, JobError> {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut reaped = 0;
        for job in self.jobs.find_stale(cutoff)? {
            let outcome = self
                .reconciler
                .apply(&job.id, AnalysisOutcome::Failure(STALE_JOB_MESSAGE.to_string()))?;
            // Anything else means the job finished between the query and the write.
            if matches!(outcome, ReconcileOutcome::Failed) {
                reaped += 1;
            }
        }

        if reaped > 0 {
            tracing::warn!(count = reaped, "Failed stale processing jobs");
        }
        Ok(reaped)
    }

    /// Starts the sweep loop on the current tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let jobs = self.jobs.clone();
        let reconciler = self.reconciler.clone();
        let interval = self.interval;
        let grace = self.grace;
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);

        tokio::spawn(async move {
            let reaper = StaleJobReaper {
                jobs,
                reconciler,
                interval,
                grace,
                shutdown: Arc::clone(&shutdown),
                wake: Arc::clone(&wake),
            };
            let mut timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = timer.tick() => {},
                    _ = wake.notified() => {},
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                if let Err(e) = reaper.sweep() {
                    tracing::error!(error = %e, "Stale job sweep failed");
                }
            }
            tracing::debug!("Stale job reaper stopped");
        })
    }

    /// Signals the loop to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
