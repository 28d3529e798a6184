pub mod analysis;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod inference;
pub mod model;
pub mod sanitize;
pub mod store;
pub mod telemetry;

pub use analysis::{AnalysisService, AnalysisSettings, StaleJobReaper, SubmittedJob};
pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use config::{load_config, Config, FailurePolicy};
pub use db::Database;
pub use error::{ConfigError, FallwatchError, InferenceError, JobError, Result};
pub use http::{build_router, serve, AppState};
pub use inference::{InferenceRunner, SubprocessRunner};
pub use model::{Alert, AlertStatus, AnalysisJob, AnalysisResult, JobStatus, Severity};
pub use store::{AlertStore, JobStore};
