//! Submission and background execution of video analyses.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::reconcile::{AnalysisOutcome, ReconcileOutcome, Reconciler};
use super::submission::{validate_media, SubmissionDetails, UploadedMedia};
use crate::broadcast::{JobEvent, JobEventBroadcaster};
use crate::config::{FailurePolicy, InferenceConfig};
use crate::error::JobError;
use crate::inference::{fallback, InferenceRequest, InferenceRunner, InferenceSlot, ParsedOutput, SlotPermit};
use crate::model::{AnalysisJob, AnalysisResult};
use crate::sanitize::redact_path;
use crate::store::{JobStore, NewJob};

/// Stored on jobs whose background task could not be started.
const SCHEDULING_FAILED_MESSAGE: &str = "Analysis could not be started";
/// Stored on jobs whose analysis panicked.
const UNEXPECTED_FAILURE_MESSAGE: &str = "Analysis failed unexpectedly";

/// Inference settings the service applies to every job.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub sensitivity: f64,
    pub confidence_threshold: f64,
    pub on_failure: FailurePolicy,
    pub model_version: String,
    pub timeout: Duration,
}

impl AnalysisSettings {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            confidence_threshold: config.confidence_threshold,
            on_failure: config.on_failure,
            model_version: config.model_version.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from_config(&InferenceConfig::default())
    }
}

/// A job accepted for analysis.
#[derive(Debug)]
pub struct SubmittedJob {
    /// The job as stored at submission, still `processing`.
    pub job: AnalysisJob,
    /// Resolves once the terminal state is written. Dropping it detaches the task.
    pub completion: JoinHandle<Result<ReconcileOutcome, JobError>>,
}

/// Snapshot of the service for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub busy: bool,
    pub model_version: String,
    pub on_failure: FailurePolicy,
    pub timeout_secs: u64,
}

/// Accepts analysis jobs and runs them one at a time in the background.
#[derive(Clone)]
pub struct AnalysisService {
    jobs: JobStore,
    runner: Arc<dyn InferenceRunner>,
    slot: InferenceSlot,
    reconciler: Reconciler,
    settings: AnalysisSettings,
}

impl AnalysisService {
    pub fn new(
        jobs: JobStore,
        runner: Arc<dyn InferenceRunner>,
        events: JobEventBroadcaster,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(jobs.clone(), events),
            jobs,
            runner,
            slot: InferenceSlot::new(),
            settings,
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        self.reconciler.events()
    }

    /// True while an analysis holds the inference slot.
    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            busy: self.slot.is_busy(),
            model_version: self.settings.model_version.clone(),
            on_failure: self.settings.on_failure,
            timeout_secs: self.settings.timeout.as_secs(),
        }
    }

    /// Validates the upload, records a `processing` job and schedules its
    /// analysis. Returns before the analysis runs.
    ///
    /// Fails with `Busy`, creating nothing, while another analysis holds the
    /// inference slot.
    pub fn submit(
        &self,
        owner_id: &str,
        media: UploadedMedia,
        details: SubmissionDetails,
    ) -> Result<SubmittedJob, JobError> {
        let span = tracing::info_span!(
            "analysis.submit",
            owner_id = %owner_id,
            media = %redact_path(&media.path),
            job_id = tracing::field::Empty,
        );
        let _enter = span.enter();

        validate_media(&media)?;
        let details = details.normalized()?;

        let permit = self.slot.try_acquire().ok_or_else(|| {
            tracing::info!("Rejecting submission, an analysis is already running");
            JobError::Busy
        })?;

        let job = self.jobs.create(NewJob {
            owner_id: owner_id.to_string(),
            input_ref: media.path.to_string_lossy().into_owned(),
            original_name: media.original_name.clone(),
            location: details.location,
            description: details.description,
        })?;
        span.record("job_id", job.id.as_str());

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "No async runtime to schedule analysis on");
                drop(permit);
                self.reconciler.apply(
                    &job.id,
                    AnalysisOutcome::Failure(SCHEDULING_FAILED_MESSAGE.to_string()),
                )?;
                return Err(JobError::SchedulingFailed { job_id: job.id });
            }
        };

        self.events().send(JobEvent::submitted(&job.id, owner_id));
        tracing::info!("Analysis job accepted");

        let request = InferenceRequest {
            media_path: media.path,
            media_size: media.size,
            sensitivity: self.settings.sensitivity,
            confidence_threshold: self.settings.confidence_threshold,
        };
        let execution_span = tracing::info_span!("analysis.execute", job_id = %job.id);
        let completion = runtime.spawn(
            self.clone()
                .execute(job.id.clone(), request, permit)
                .instrument(execution_span),
        );

        Ok(SubmittedJob { job, completion })
    }

    /// Runs the model and reconciles its outcome. Holds the slot until the
    /// terminal state is written.
    async fn execute(
        self,
        job_id: String,
        request: InferenceRequest,
        _permit: SlotPermit,
    ) -> Result<ReconcileOutcome, JobError> {
        let started = Instant::now();
        let media_size = request.media_size;
        let runner = Arc::clone(&self.runner);

        let attempt = AssertUnwindSafe(async move { runner.run(&request).await })
            .catch_unwind()
            .await;

        let outcome = match attempt {
            Ok(Ok(parsed)) => AnalysisOutcome::Success(self.to_result(parsed, started.elapsed())),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Inference attempt failed");
                self.degrade(e.user_message(), media_size, started.elapsed())
            }
            Err(_) => {
                tracing::error!("Inference task panicked");
                self.degrade(UNEXPECTED_FAILURE_MESSAGE, media_size, started.elapsed())
            }
        };

        let succeeded = matches!(outcome, AnalysisOutcome::Success(_));
        match self.reconciler.apply(&job_id, outcome) {
            Ok(reconciled) => Ok(reconciled),
            Err(e) if succeeded => {
                // The completion transaction rolled back; the job is still processing.
                tracing::error!(error = %e, "Failed to store analysis result, marking job failed");
                self.reconciler.apply(
                    &job_id,
                    AnalysisOutcome::Failure(UNEXPECTED_FAILURE_MESSAGE.to_string()),
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to store analysis outcome");
                Err(e)
            }
        }
    }

    fn to_result(&self, parsed: ParsedOutput, elapsed: Duration) -> AnalysisResult {
        AnalysisResult {
            fall_detected: parsed.fall_detected,
            confidence: parsed.confidence,
            processing_time_ms: parsed
                .processing_time_ms
                .unwrap_or(elapsed.as_millis() as u64),
            frames_processed: parsed.frames_processed,
            model_version: parsed
                .model_version
                .unwrap_or_else(|| self.settings.model_version.clone()),
            is_simulated: parsed.is_simulated.unwrap_or(false),
            detections: parsed.detections,
        }
    }

    /// Applies the failure policy to a failed attempt.
    fn degrade(&self, message: &str, media_size: u64, elapsed: Duration) -> AnalysisOutcome {
        match self.settings.on_failure {
            FailurePolicy::Fail => AnalysisOutcome::Failure(message.to_string()),
            FailurePolicy::Simulate => {
                tracing::warn!("Model unavailable, completing with a simulated result");
                AnalysisOutcome::Success(fallback::simulate(
                    media_size,
                    &self.settings.model_version,
                    elapsed,
                ))
            }
        }
    }
}
