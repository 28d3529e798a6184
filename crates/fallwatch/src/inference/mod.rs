//! Integration with the external fall-detection model.
//!
//! The model is only ever reached through a child process. Its stdout is
//! parsed into a [`ParsedOutput`]; everything else about the model is opaque.

pub mod fallback;
pub mod parse;
pub mod process;
pub mod slot;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::InferenceError;

pub use parse::{parse_output, OutputFormat, ParseError, ParsedOutput};
pub use process::SubprocessRunner;
pub use slot::{InferenceSlot, SlotPermit};

/// One analysis request handed to a runner.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub media_path: PathBuf,
    pub media_size: u64,
    pub sensitivity: f64,
    pub confidence_threshold: f64,
}

/// Runs the model on one media file.
#[async_trait]
pub trait InferenceRunner: Send + Sync {
    async fn run(&self, request: &InferenceRequest) -> Result<ParsedOutput, InferenceError>;
}
