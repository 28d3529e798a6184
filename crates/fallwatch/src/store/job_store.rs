//! Job store with persistent database storage.

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use super::alert_store::alert_from_row;
use super::{ensure_owner, ListParams, Page};
use crate::db::alert_repo::{self, AlertRow};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::JobError;
use crate::model::{
    Alert, AlertKind, AlertStatus, AnalysisJob, AnalysisResult, JobStatus, Severity,
};
use crate::sanitize::redact_path;

/// Message carried by every fall alert.
pub const FALL_ALERT_MESSAGE: &str = "Fall detected in video analysis";

/// Fields supplied when a job is created.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub owner_id: String,
    pub input_ref: String,
    pub original_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Outcome of a guarded terminal write.
#[derive(Debug, Clone)]
pub enum TerminalWrite {
    /// This call moved the job out of `processing`.
    Applied {
        job: AnalysisJob,
        alert: Option<Alert>,
    },
    /// The job had already reached a terminal state. Nothing was written.
    AlreadyTerminal,
    /// No job with that id exists.
    Missing,
}

pub(crate) fn job_from_row(row: JobRow) -> Result<AnalysisJob, DatabaseError> {
    let status: JobStatus = row.status.parse().map_err(|_| DatabaseError::InvalidValue {
        column: "status",
        value: row.status.clone(),
    })?;
    let result = match row.result_json.as_deref() {
        Some(json) => Some(serde_json::from_str::<AnalysisResult>(json).map_err(|e| {
            DatabaseError::Serialization {
                column: "result_json",
                source: e,
            }
        })?),
        None => None,
    };

    Ok(AnalysisJob {
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        id: row.id,
        owner_id: row.owner_id,
        input_ref: row.input_ref,
        original_name: row.original_name,
        location: row.location,
        description: row.description,
        status,
        result,
        error: row.error,
    })
}

fn fall_alert_message(location: Option<&str>) -> String {
    match location.map(str::trim).filter(|l| !l.is_empty()) {
        Some(location) => format!("{} at {}", FALL_ALERT_MESSAGE, location),
        None => FALL_ALERT_MESSAGE.to_string(),
    }
}

/// Persistent job store backed by rusqlite.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new job in `processing` and returns it.
    pub fn create(&self, new_job: NewJob) -> Result<AnalysisJob, JobError> {
        let now = format_timestamp(Utc::now());
        let row = JobRow {
            id: Uuid::new_v4().to_string(),
            owner_id: new_job.owner_id,
            input_ref: new_job.input_ref,
            original_name: new_job.original_name,
            location: new_job.location,
            description: new_job.description,
            status: JobStatus::Processing.as_str().to_string(),
            result_json: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };
        job_repo::insert(&self.db, &row)?;
        Ok(job_from_row(row)?)
    }

    /// Fetches a job regardless of owner. Internal use only.
    pub fn get(&self, id: &str) -> Result<Option<AnalysisJob>, JobError> {
        match job_repo::find_by_id(&self.db, id)? {
            Some(row) => Ok(Some(job_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Fetches a job on behalf of `caller`.
    pub fn get_for_owner(&self, caller: &str, id: &str) -> Result<AnalysisJob, JobError> {
        let job = self.get(id)?.ok_or(JobError::NotFound)?;
        ensure_owner(&job.owner_id, caller)?;
        Ok(job)
    }

    /// Lists the caller's jobs, newest first.
    pub fn list_for_owner(
        &self,
        caller: &str,
        params: &ListParams,
    ) -> Result<Page<AnalysisJob>, JobError> {
        let status = match params.status.as_deref() {
            Some(s) => Some(
                s.parse::<JobStatus>()
                    .map_err(|e| JobError::InvalidInput(e.to_string()))?,
            ),
            None => None,
        };
        let limit = params.limit();
        let offset = params.offset();
        let filter = JobFilter {
            owner_id: Some(caller.to_string()),
            status: status.map(|s| s.as_str().to_string()),
            limit: Some(limit),
            offset: Some(offset),
        };
        let (rows, total) = job_repo::query(&self.db, &filter)?;
        let items = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Completes a `processing` job and, when a fall was detected, raises its
    /// alert in the same transaction.
    pub fn complete(&self, id: &str, result: &AnalysisResult) -> Result<TerminalWrite, JobError> {
        let result_json =
            serde_json::to_string(result).map_err(|e| DatabaseError::Serialization {
                column: "result_json",
                source: e,
            })?;

        let write = self.db.with_transaction(|tx| {
            let Some(existing) = job_repo::find_by_id_in(tx, id)? else {
                return Ok(TerminalWrite::Missing);
            };

            let now = format_timestamp(Utc::now());
            if !job_repo::complete_if_processing(tx, id, &result_json, &now)? {
                return Ok(TerminalWrite::AlreadyTerminal);
            }

            let alert = if result.fall_detected {
                let row = AlertRow {
                    id: Uuid::new_v4().to_string(),
                    owner_id: existing.owner_id.clone(),
                    source_job_id: Some(id.to_string()),
                    kind: AlertKind::FallDetected.as_str().to_string(),
                    severity: Severity::High.as_str().to_string(),
                    message: fall_alert_message(existing.location.as_deref()),
                    confidence: Some(result.confidence),
                    location: existing.location.clone(),
                    status: AlertStatus::Active.as_str().to_string(),
                    created_at: now.clone(),
                    updated_at: now,
                };
                alert_repo::insert(tx, &row)?;
                Some(alert_from_row(row)?)
            } else {
                None
            };

            let updated = job_repo::find_by_id_in(tx, id)?.ok_or_else(|| {
                DatabaseError::InvalidValue {
                    column: "id",
                    value: id.to_string(),
                }
            })?;
            Ok(TerminalWrite::Applied {
                job: job_from_row(updated)?,
                alert,
            })
        })?;
        Ok(write)
    }

    /// Fails a `processing` job with a user-facing message.
    pub fn fail(&self, id: &str, message: &str) -> Result<TerminalWrite, JobError> {
        let write = self.db.with_transaction(|tx| {
            if job_repo::find_by_id_in(tx, id)?.is_none() {
                return Ok(TerminalWrite::Missing);
            }

            let now = format_timestamp(Utc::now());
            if !job_repo::fail_if_processing(tx, id, message, &now)? {
                return Ok(TerminalWrite::AlreadyTerminal);
            }

            let updated = job_repo::find_by_id_in(tx, id)?.ok_or_else(|| {
                DatabaseError::InvalidValue {
                    column: "id",
                    value: id.to_string(),
                }
            })?;
            Ok(TerminalWrite::Applied {
                job: job_from_row(updated)?,
                alert: None,
            })
        })?;
        Ok(write)
    }

    /// Deletes a terminal job owned by `caller` together with its alerts.
    ///
    /// The stored upload is removed afterwards on a best-effort basis.
    pub fn delete_for_owner(&self, caller: &str, id: &str) -> Result<(), JobError> {
        let job = self.get_for_owner(caller, id)?;
        if !job.status.is_terminal() {
            return Err(JobError::StillProcessing(job.id));
        }

        let removed = self.db.with_transaction(|tx| {
            let alerts = alert_repo::delete_for_job(tx, id)?;
            let deleted = job_repo::delete(tx, id)?;
            Ok((alerts, deleted))
        })?;
        if !removed.1 {
            return Err(JobError::NotFound);
        }
        log::info!("Deleted job {} and {} alert(s)", id, removed.0);

        let input = Path::new(&job.input_ref);
        if let Err(e) = std::fs::remove_file(input) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove upload {} for job {}: {}",
                    redact_path(input),
                    id,
                    e
                );
            }
        }
        Ok(())
    }

    /// Returns `processing` jobs untouched since `before`.
    pub fn find_stale(&self, before: chrono::DateTime<Utc>) -> Result<Vec<AnalysisJob>, JobError> {
        let rows = job_repo::find_stale_processing(&self.db, &format_timestamp(before))?;
        Ok(rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
