//! Parser for the inference process's stdout.
//!
//! Two formats are recognized, tried in order:
//!
//! 1. A JSON object anywhere in the stream that carries a fall flag
//!    (`fall_detected` or `fallDetected`). Surrounding log noise is ignored.
//! 2. Line-oriented `label: value` pairs, e.g.
//!
//! ```text
//! Prediction: Fall
//! Confidence: 93.4%
//! Processing time: 1.52s
//! Frames: 240
//! ```
//!
//! The fall flag and the confidence are required. Nothing is defaulted.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::model::FallDetection;

static RE_LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z _-]*?)\s*[:=]\s*(.+?)\s*$").unwrap()
});
static RE_CONFIDENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]*\.?[0-9]+)\s*(%)?$").unwrap());
static RE_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*\.?[0-9]+)\s*(ms|milliseconds?|s|secs?|seconds?)?$").unwrap()
});
static RE_LEADING_INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)").unwrap());

/// Which strategy produced a [`ParsedOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    KeyValue,
}

/// Model output extracted from stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub format: OutputFormat,
    pub fall_detected: bool,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub processing_time_ms: Option<u64>,
    pub frames_processed: Option<u64>,
    pub model_version: Option<String>,
    /// Set when the model reports that it produced a simulated result.
    pub is_simulated: Option<bool>,
    pub detections: Vec<FallDetection>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("inference produced no output")]
    Empty,

    #[error("inference output is in no recognized format")]
    Unrecognized,

    #[error("inference output is missing '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("inference output exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Parses the raw stdout of an inference run.
pub fn parse_output(stdout: &[u8]) -> Result<ParsedOutput, ParseError> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(parsed) = parse_embedded_json(&text) {
        return parsed;
    }
    if let Some(parsed) = parse_key_values(&text) {
        return parsed;
    }
    Err(ParseError::Unrecognized)
}

// ─── JSON strategy ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonDetection {
    frame: u64,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct JsonOutput {
    #[serde(alias = "fallDetected")]
    fall_detected: bool,
    confidence: Option<f64>,
    #[serde(alias = "processingTimeMs")]
    processing_time_ms: Option<f64>,
    /// Seconds.
    #[serde(alias = "processingTime")]
    processing_time: Option<f64>,
    #[serde(alias = "framesProcessed", alias = "frames")]
    frames_processed: Option<u64>,
    #[serde(alias = "modelVersion")]
    model_version: Option<String>,
    #[serde(alias = "simulation", alias = "isSimulated")]
    is_simulated: Option<bool>,
    #[serde(alias = "fallDetections", default)]
    fall_detections: Vec<JsonDetection>,
}

fn has_fall_flag(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("fall_detected") || o.contains_key("fallDetected"))
}

/// Returns `None` when the stream holds no JSON object with a fall flag.
fn parse_embedded_json(text: &str) -> Option<Result<ParsedOutput, ParseError>> {
    for (start, _) in text.match_indices('{') {
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        if !has_fall_flag(&value) {
            continue;
        }

        let output: JsonOutput = match serde_json::from_value(value) {
            Ok(output) => output,
            Err(e) => {
                return Some(Err(ParseError::InvalidValue {
                    field: "json",
                    value: e.to_string(),
                }))
            }
        };
        return Some(from_json(output));
    }
    None
}

fn from_json(output: JsonOutput) -> Result<ParsedOutput, ParseError> {
    let confidence = output.confidence.ok_or(ParseError::MissingField("confidence"))?;
    let confidence = check_fraction(confidence, &confidence.to_string())?;

    let processing_time_ms = match (output.processing_time_ms, output.processing_time) {
        (Some(ms), _) => Some(non_negative_ms(ms, "processing_time_ms")?),
        (None, Some(secs)) => Some(non_negative_ms(secs * 1000.0, "processing_time")?),
        (None, None) => None,
    };

    let detections = output
        .fall_detections
        .into_iter()
        .map(|d| {
            Ok(FallDetection {
                frame: d.frame,
                confidence: check_fraction(d.confidence, &d.confidence.to_string())?,
            })
        })
        .collect::<Result<Vec<_>, ParseError>>()?;

    Ok(ParsedOutput {
        format: OutputFormat::Json,
        fall_detected: output.fall_detected,
        confidence,
        processing_time_ms,
        frames_processed: output.frames_processed,
        model_version: output.model_version.filter(|v| !v.trim().is_empty()),
        is_simulated: output.is_simulated,
        detections,
    })
}

// ─── Key/value strategy ─────────────────────────────────────────────────────

#[derive(Default)]
struct KeyValueFields {
    fall_detected: Option<bool>,
    confidence: Option<f64>,
    processing_time_ms: Option<u64>,
    frames_processed: Option<u64>,
    model_version: Option<String>,
    recognized: bool,
}

fn normalize_label(label: &str) -> String {
    label
        .to_ascii_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns `None` when no line carries a known label.
fn parse_key_values(text: &str) -> Option<Result<ParsedOutput, ParseError>> {
    let mut fields = KeyValueFields::default();

    for line in text.lines() {
        let Some(caps) = RE_LABEL_VALUE.captures(line) else {
            continue;
        };
        let label = normalize_label(&caps[1]);
        let value = caps[2].trim();

        let applied = match label.as_str() {
            "prediction" | "fall detected" | "result" | "fall" => {
                parse_flag(value).map(|v| fields.fall_detected = Some(v))
            }
            "confidence" => parse_confidence(value).map(|v| fields.confidence = Some(v)),
            "processing time" => {
                parse_duration_ms(value).map(|v| fields.processing_time_ms = Some(v))
            }
            "frames" | "frames processed" => {
                parse_count(value).map(|v| fields.frames_processed = Some(v))
            }
            "model version" => {
                fields.model_version = Some(value.to_string());
                Ok(())
            }
            _ => continue,
        };
        if let Err(e) = applied {
            return Some(Err(e));
        }
        fields.recognized = true;
    }

    if !fields.recognized {
        return None;
    }

    Some(
        match (fields.fall_detected, fields.confidence) {
            (None, _) => Err(ParseError::MissingField("prediction")),
            (_, None) => Err(ParseError::MissingField("confidence")),
            (Some(fall_detected), Some(confidence)) => Ok(ParsedOutput {
                format: OutputFormat::KeyValue,
                fall_detected,
                confidence,
                processing_time_ms: fields.processing_time_ms,
                frames_processed: fields.frames_processed,
                model_version: fields.model_version,
                is_simulated: None,
                detections: Vec::new(),
            }),
        },
    )
}

fn parse_flag(value: &str) -> Result<bool, ParseError> {
    let normalized = normalize_label(value.trim_end_matches(['!', '.']));
    match normalized.as_str() {
        "fall" | "fall detected" | "detected" | "true" | "yes" | "1" => Ok(true),
        "no fall" | "no fall detected" | "not fall" | "not detected" | "normal" | "false"
        | "no" | "none" | "0" => Ok(false),
        _ => Err(ParseError::InvalidValue {
            field: "prediction",
            value: value.to_string(),
        }),
    }
}

fn parse_confidence(value: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidValue {
        field: "confidence",
        value: value.to_string(),
    };
    let caps = RE_CONFIDENCE.captures(value).ok_or_else(invalid)?;
    let number: f64 = caps[1].parse().map_err(|_| invalid())?;
    let fraction = if caps.get(2).is_some() {
        number / 100.0
    } else {
        number
    };
    check_fraction(fraction, value)
}

fn parse_duration_ms(value: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidValue {
        field: "processing time",
        value: value.to_string(),
    };
    let lowered = value.to_ascii_lowercase();
    let caps = RE_DURATION.captures(&lowered).ok_or_else(invalid)?;
    let number: f64 = caps[1].parse().map_err(|_| invalid())?;
    let ms = match caps.get(2).map(|m| m.as_str()) {
        Some(unit) if unit.starts_with("ms") || unit.starts_with("milli") => number,
        _ => number * 1000.0,
    };
    Ok(ms.round() as u64)
}

fn parse_count(value: &str) -> Result<u64, ParseError> {
    RE_LEADING_INT
        .captures(value)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| ParseError::InvalidValue {
            field: "frames",
            value: value.to_string(),
        })
}

fn check_fraction(value: f64, raw: &str) -> Result<f64, ParseError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ParseError::InvalidValue {
            field: "confidence",
            value: raw.to_string(),
        })
    }
}

fn non_negative_ms(ms: f64, field: &'static str) -> Result<u64, ParseError> {
    if ms.is_finite() && ms >= 0.0 {
        Ok(ms.round() as u64)
    } else {
        Err(ParseError::InvalidValue {
            field,
            value: ms.to_string(),
        })
    }
}
