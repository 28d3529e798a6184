//! Validation of submitted media and its accompanying details.

use std::path::{Path, PathBuf};

use crate::error::JobError;

/// Video containers the model accepts.
pub const ACCEPTED_VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "video/webm",
    "video/mpeg",
    "video/3gpp",
    "video/x-m4v",
];

/// Longest accepted `location` or `description`.
pub const MAX_DETAIL_LEN: usize = 500;

/// An upload already stored on the server.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub path: PathBuf,
    pub size: u64,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
    /// File name supplied by the client, if any.
    pub original_name: Option<String>,
}

/// Optional free text attached to a submission.
#[derive(Debug, Clone, Default)]
pub struct SubmissionDetails {
    pub location: Option<String>,
    pub description: Option<String>,
}

impl SubmissionDetails {
    /// Trims both fields, drops empty ones and rejects oversized text.
    pub fn normalized(self) -> Result<Self, JobError> {
        Ok(Self {
            location: normalize_detail("location", self.location)?,
            description: normalize_detail("description", self.description)?,
        })
    }
}

fn normalize_detail(field: &str, value: Option<String>) -> Result<Option<String>, JobError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_DETAIL_LEN {
        return Err(JobError::InvalidInput(format!(
            "{} must be at most {} characters",
            field, MAX_DETAIL_LEN
        )));
    }
    Ok(Some(trimmed.to_string()))
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Content type used for validation.
///
/// The declared type wins unless it is missing or `application/octet-stream`,
/// in which case the type is guessed from the file name.
pub fn resolve_content_type(media: &UploadedMedia) -> Option<String> {
    let declared = media
        .content_type
        .as_deref()
        .map(essence)
        .filter(|t| !t.is_empty() && t != "application/octet-stream");
    if declared.is_some() {
        return declared;
    }

    let name = media
        .original_name
        .as_deref()
        .map(Path::new)
        .unwrap_or(media.path.as_path());
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Checks that the media is non-empty and an accepted video container.
/// Returns the resolved content type.
pub fn validate_media(media: &UploadedMedia) -> Result<String, JobError> {
    if media.size == 0 {
        return Err(JobError::InvalidInput("Video file is empty".to_string()));
    }

    match resolve_content_type(media) {
        Some(content_type) if ACCEPTED_VIDEO_TYPES.contains(&content_type.as_str()) => {
            Ok(content_type)
        }
        Some(content_type) => Err(JobError::InvalidInput(format!(
            "Unsupported content type '{}', expected a video file",
            content_type
        ))),
        None => Err(JobError::InvalidInput(
            "Could not determine the content type of the upload".to_string(),
        )),
    }
}
