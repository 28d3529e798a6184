use std::path::PathBuf;
use thiserror::Error;

use crate::inference::ParseError;

#[derive(Error, Debug)]
pub enum FallwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Errors surfaced synchronously to callers of the job and alert operations.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("An analysis is already running, retry later")]
    Busy,

    #[error("Not found")]
    NotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Job {0} is still processing")]
    StillProcessing(String),

    #[error("Analysis for job {job_id} could not be scheduled")]
    SchedulingFailed { job_id: String },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failed inference attempt.
///
/// The `Display` form may include stderr and host paths and is for logs only.
/// Job records get [`InferenceError::user_message`].
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to spawn inference command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inference process IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inference process exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Inference timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to parse inference output: {0}")]
    Parse(#[from] ParseError),
}

impl InferenceError {
    /// Message safe to store on the job and show to end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            InferenceError::Spawn { .. } => "Inference process could not be started",
            InferenceError::Io(_) => "Inference process could not be read",
            InferenceError::NonZeroExit { .. } => "Inference process failed",
            InferenceError::Timeout { .. } => "Analysis timed out",
            InferenceError::Parse(_) => "Inference output could not be parsed",
        }
    }
}

pub type Result<T> = std::result::Result<T, FallwatchError>;
