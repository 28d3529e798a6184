//! Alert handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::auth::AuthUser;
use super::error::ApiError;
use super::AppState;
use crate::model::AlertStatus;
use crate::store::ListParams;

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdate {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkStatusUpdate {
    alert_ids: Vec<String>,
    status: String,
}

fn parse_status(raw: &str) -> Result<AlertStatus, ApiError> {
    raw.parse::<AlertStatus>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

/// GET /api/alerts
pub(crate) async fn handle_list_alerts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let page = state
        .alerts
        .list_for_owner(&user, &params)
        .map_err(|e| state.reject(e))?;
    Ok(Json(serde_json::json!({
        "alerts": page.items,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// GET /api/alerts/{id}
pub(crate) async fn handle_get_alert(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let alert = state
        .alerts
        .get_for_owner(&user, &id)
        .map_err(|e| state.reject(e))?;
    Ok(Json(alert))
}

/// PATCH /api/alerts/{id}
pub(crate) async fn handle_update_alert(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(update) = payload?;
    let status = parse_status(&update.status)?;
    let alert = state
        .alerts
        .update_status_for_owner(&user, &id, status)
        .map_err(|e| state.reject(e))?;
    tracing::info!(alert_id = %alert.id, status = %alert.status, "Alert status changed");
    Ok(Json(alert))
}

/// POST /api/alerts/bulk-status
pub(crate) async fn handle_bulk_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<BulkStatusUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(update) = payload?;
    let status = parse_status(&update.status)?;
    if update.alert_ids.is_empty() {
        return Err(ApiError::bad_request("alertIds must not be empty"));
    }
    let outcome = state
        .alerts
        .bulk_update_status(&user, &update.alert_ids, status)
        .map_err(|e| state.reject(e))?;
    Ok(Json(outcome))
}
