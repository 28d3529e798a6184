//! Analysis job handlers: upload, list, fetch and delete.

use std::path::Path as FsPath;

use axum::extract::multipart::Field;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tokio::io::AsyncWriteExt;

use super::auth::AuthUser;
use super::error::ApiError;
use super::AppState;
use crate::analysis::{SubmissionDetails, UploadedMedia};
use crate::error::JobError;
use crate::sanitize::{redact_path, sanitize_upload_name};
use crate::store::ListParams;

/// Multipart field holding the video.
const VIDEO_FIELD: &str = "video";

/// POST /api/fall-detection/analyze
pub(crate) async fn handle_analyze(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // Answer before the body is read; submit() re-checks authoritatively.
    if state.service.is_busy() {
        return Err(state.reject(JobError::Busy));
    }

    let (media, details) = read_upload(&state, multipart).await?;
    let Some(media) = media else {
        return Err(ApiError::bad_request("missing 'video' file field"));
    };

    let stored = media.path.clone();
    match state.service.submit(&user, media, details) {
        Ok(submitted) => {
            // Detached: the handler never waits for inference.
            drop(submitted.completion);
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "jobId": submitted.job.id,
                    "status": submitted.job.status,
                })),
            ))
        }
        Err(e) => {
            // A job that failed to schedule keeps its upload until deleted.
            if !matches!(e, JobError::SchedulingFailed { .. }) {
                remove_upload(&stored).await;
            }
            Err(state.reject(e))
        }
    }
}

/// Reads the form, streaming the video into the uploads directory.
/// Anything written is removed again when the form is rejected.
async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(Option<UploadedMedia>, SubmissionDetails), ApiError> {
    let mut media = None;
    let mut details = SubmissionDetails::default();

    match read_fields(state, &mut multipart, &mut media, &mut details).await {
        Ok(()) => Ok((media, details)),
        Err(e) => {
            if let Some(media) = media {
                remove_upload(&media.path).await;
            }
            Err(e)
        }
    }
}

async fn read_fields(
    state: &AppState,
    multipart: &mut Multipart,
    media: &mut Option<UploadedMedia>,
    details: &mut SubmissionDetails,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(VIDEO_FIELD) => {
                if media.is_some() {
                    return Err(ApiError::bad_request("only one video may be uploaded"));
                }
                *media = Some(store_video(state, field).await?);
            }
            Some("location") => details.location = Some(read_text(field).await?),
            Some("description") => details.description = Some(read_text(field).await?),
            _ => {}
        }
    }
    Ok(())
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))
}

/// Writes one upload to `<uuid>-<sanitized name>` under the uploads directory.
async fn store_video(state: &AppState, mut field: Field<'_>) -> Result<UploadedMedia, ApiError> {
    let original_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);
    let file_name = format!(
        "{}-{}",
        uuid::Uuid::new_v4(),
        sanitize_upload_name(original_name.as_deref().unwrap_or_default())
    );
    let path = state.uploads_dir.join(file_name);

    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .map_err(|e| state.io_error(&state.uploads_dir, e))?;
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| state.io_error(&path, e))?;

    let size = match write_chunks(state, &mut field, &mut file, &path).await {
        Ok(size) => size,
        Err(e) => {
            drop(file);
            remove_upload(&path).await;
            return Err(e);
        }
    };

    tracing::debug!(media = %redact_path(&path), size, "Stored upload");
    Ok(UploadedMedia {
        path,
        size,
        content_type,
        original_name,
    })
}

async fn write_chunks(
    state: &AppState,
    field: &mut Field<'_>,
    file: &mut tokio::fs::File,
    path: &FsPath,
) -> Result<u64, ApiError> {
    let mut size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        size += chunk.len() as u64;
        if size > state.max_upload_bytes {
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("video exceeds {} bytes", state.max_upload_bytes),
            ));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| state.io_error(path, e))?;
    }
    file.flush().await.map_err(|e| state.io_error(path, e))?;
    Ok(size)
}

async fn remove_upload(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(media = %redact_path(path), error = %e, "Failed to remove upload");
        }
    }
}

/// GET /api/fall-detection/analysis
pub(crate) async fn handle_list_jobs(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let page = state
        .service
        .jobs()
        .list_for_owner(&user, &params)
        .map_err(|e| state.reject(e))?;
    Ok(Json(serde_json::json!({
        "jobs": page.items,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// GET /api/fall-detection/analysis/{id}
pub(crate) async fn handle_get_job(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .service
        .jobs()
        .get_for_owner(&user, &id)
        .map_err(|e| state.reject(e))?;
    Ok(Json(job))
}

/// DELETE /api/fall-detection/analysis/{id}
pub(crate) async fn handle_delete_job(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .jobs()
        .delete_for_owner(&user, &id)
        .map_err(|e| state.reject(e))?;
    Ok(StatusCode::NO_CONTENT)
}
