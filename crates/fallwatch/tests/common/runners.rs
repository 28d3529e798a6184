//! In-process inference runners for tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use fallwatch::error::InferenceError;
use fallwatch::inference::{InferenceRequest, InferenceRunner, OutputFormat, ParsedOutput};

/// Builds a parsed model output.
pub fn parsed(fall_detected: bool, confidence: f64) -> ParsedOutput {
    ParsedOutput {
        format: OutputFormat::Json,
        fall_detected,
        confidence,
        processing_time_ms: Some(1200),
        frames_processed: Some(90),
        model_version: Some("2.1.0".to_string()),
        is_simulated: None,
        detections: vec![],
    }
}

/// Runner that blocks every call until released.
pub struct GatedRunner {
    output: ParsedOutput,
    gate: Notify,
    calls: AtomicUsize,
}

impl GatedRunner {
    pub fn new(output: ParsedOutput) -> Arc<Self> {
        Arc::new(Self {
            output,
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Lets one pending (or the next) call finish.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceRunner for GatedRunner {
    async fn run(&self, _request: &InferenceRequest) -> Result<ParsedOutput, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(self.output.clone())
    }
}
