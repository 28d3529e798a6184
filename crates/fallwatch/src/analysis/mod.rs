//! The video analysis job: submission, background execution, reconciliation
//! and the stale-job reaper.

pub mod reaper;
pub mod reconcile;
pub mod service;
pub mod submission;

pub use reaper::StaleJobReaper;
pub use reconcile::{AnalysisOutcome, ReconcileOutcome, Reconciler};
pub use service::{AnalysisService, AnalysisSettings, ServiceStatus, SubmittedJob};
pub use submission::{validate_media, SubmissionDetails, UploadedMedia, ACCEPTED_VIDEO_TYPES};
