//! Deterministic fallback estimator used when the model cannot run and
//! `inference.on_failure` is `simulate`.
//!
//! The same media size always yields the same result. Results are marked
//! `is_simulated` so they are never mistaken for model output.

use std::time::Duration;

use crate::model::AnalysisResult;

/// Share of inputs the estimator reports as falls.
const SIMULATED_FALL_RATE: f64 = 0.3;

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Maps a hash onto `[0, 1)`.
fn unit(hash: u64) -> f64 {
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Builds a simulated result for media of `media_size` bytes.
pub fn simulate(media_size: u64, model_version: &str, elapsed: Duration) -> AnalysisResult {
    let first = splitmix64(media_size);
    let second = splitmix64(first);

    let fall_detected = unit(first) >= 1.0 - SIMULATED_FALL_RATE;
    let confidence = if fall_detected {
        0.85 + unit(second) * 0.14
    } else {
        0.05 + unit(second) * 0.45
    };

    AnalysisResult {
        fall_detected,
        confidence: round3(confidence),
        processing_time_ms: elapsed.as_millis() as u64,
        frames_processed: None,
        model_version: model_version.to_string(),
        is_simulated: true,
        detections: Vec::new(),
    }
}
