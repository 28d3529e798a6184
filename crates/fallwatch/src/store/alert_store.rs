//! Alert store: owner-scoped reads and status transitions.

use chrono::Utc;
use serde::Serialize;

use super::{ensure_owner, ListParams, Page};
use crate::db::alert_repo::{self, AlertFilter, AlertRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::JobError;
use crate::model::{Alert, AlertKind, AlertStatus, Severity};

pub(crate) fn alert_from_row(row: AlertRow) -> Result<Alert, DatabaseError> {
    let kind: AlertKind = row.kind.parse().map_err(|_| DatabaseError::InvalidValue {
        column: "kind",
        value: row.kind.clone(),
    })?;
    let severity: Severity = row
        .severity
        .parse()
        .map_err(|_| DatabaseError::InvalidValue {
            column: "severity",
            value: row.severity.clone(),
        })?;
    let status: AlertStatus = row.status.parse().map_err(|_| DatabaseError::InvalidValue {
        column: "status",
        value: row.status.clone(),
    })?;

    Ok(Alert {
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        id: row.id,
        owner_id: row.owner_id,
        source_job_id: row.source_job_id,
        kind,
        severity,
        message: row.message,
        confidence: row.confidence,
        location: row.location,
        status,
    })
}

/// Result of a bulk status change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkUpdateOutcome {
    /// Ids whose status was changed.
    pub updated: Vec<String>,
    /// Ids that are unknown or belong to someone else.
    pub skipped: Vec<String>,
}

/// Persistent alert store backed by rusqlite.
#[derive(Clone)]
pub struct AlertStore {
    db: Database,
}

impl AlertStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetches an alert on behalf of `caller`.
    pub fn get_for_owner(&self, caller: &str, id: &str) -> Result<Alert, JobError> {
        let row = alert_repo::find_by_id(&self.db, id)?.ok_or(JobError::NotFound)?;
        ensure_owner(&row.owner_id, caller)?;
        Ok(alert_from_row(row)?)
    }

    /// Returns the alert raised for a job, if any. Not owner-scoped.
    pub fn find_by_job(&self, job_id: &str) -> Result<Option<Alert>, JobError> {
        match alert_repo::find_by_source_job(&self.db, job_id)? {
            Some(row) => Ok(Some(alert_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Lists the caller's alerts, newest first.
    pub fn list_for_owner(&self, caller: &str, params: &ListParams) -> Result<Page<Alert>, JobError> {
        let status = match params.status.as_deref() {
            Some(s) => Some(
                s.parse::<AlertStatus>()
                    .map_err(|e| JobError::InvalidInput(e.to_string()))?,
            ),
            None => None,
        };
        let limit = params.limit();
        let offset = params.offset();
        let filter = AlertFilter {
            owner_id: Some(caller.to_string()),
            status: status.map(|s| s.as_str().to_string()),
            limit: Some(limit),
            offset: Some(offset),
        };
        let (rows, total) = alert_repo::query(&self.db, &filter)?;
        let items = rows
            .into_iter()
            .map(alert_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Sets the status of one of the caller's alerts and returns it.
    pub fn update_status_for_owner(
        &self,
        caller: &str,
        id: &str,
        status: AlertStatus,
    ) -> Result<Alert, JobError> {
        self.get_for_owner(caller, id)?;
        let now = format_timestamp(Utc::now());
        self.db
            .with_conn(|conn| alert_repo::update_status(conn, id, status.as_str(), &now))?;
        self.get_for_owner(caller, id)
    }

    /// Sets the status of every listed alert owned by `caller` in one
    /// transaction. Unknown and foreign ids are skipped.
    pub fn bulk_update_status(
        &self,
        caller: &str,
        ids: &[String],
        status: AlertStatus,
    ) -> Result<BulkUpdateOutcome, JobError> {
        let now = format_timestamp(Utc::now());
        let outcome = self.db.with_transaction(|tx| {
            let mut outcome = BulkUpdateOutcome::default();
            for id in ids {
                let owned = alert_repo::owner_of(tx, id)?.is_some_and(|owner| owner == caller);
                if owned && !outcome.updated.contains(id) {
                    alert_repo::update_status(tx, id, status.as_str(), &now)?;
                    outcome.updated.push(id.clone());
                } else if !owned {
                    outcome.skipped.push(id.clone());
                }
            }
            Ok(outcome)
        })?;

        if !outcome.skipped.is_empty() {
            log::debug!(
                "Bulk alert update for {} skipped {} id(s)",
                caller,
                outcome.skipped.len()
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> AlertStore {
        let db = Database::open_in_memory().expect("Failed to create test database");
        db.with_conn(|conn| {
            for (id, owner, job) in [("a1", "user-a", "j1"), ("a2", "user-a", "j2"), ("b1", "user-b", "j3")] {
                alert_repo::insert(
                    conn,
                    &AlertRow {
                        id: id.to_string(),
                        owner_id: owner.to_string(),
                        source_job_id: Some(job.to_string()),
                        kind: "fall_detected".to_string(),
                        severity: "high".to_string(),
                        message: "Fall detected in video analysis".to_string(),
                        confidence: Some(0.9),
                        location: None,
                        status: "active".to_string(),
                        created_at: "2026-01-01T00:00:00.000000Z".to_string(),
                        updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        AlertStore::new(db)
    }

    #[test]
    fn test_get_for_owner() {
        let store = seeded_store();
        let alert = store.get_for_owner("user-a", "a1").unwrap();
        assert_eq!(alert.kind, AlertKind::FallDetected);
        assert!(matches!(
            store.get_for_owner("user-a", "b1"),
            Err(JobError::AccessDenied)
        ));
        assert!(matches!(
            store.get_for_owner("user-a", "zz"),
            Err(JobError::NotFound)
        ));
    }

    #[test]
    fn test_update_status_for_owner() {
        let store = seeded_store();
        let alert = store
            .update_status_for_owner("user-a", "a1", AlertStatus::Acknowledged)
            .unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert_ne!(alert.updated_at, alert.created_at);

        assert!(matches!(
            store.update_status_for_owner("user-b", "a1", AlertStatus::Resolved),
            Err(JobError::AccessDenied)
        ));
    }

    #[test]
    fn test_bulk_update_skips_foreign_and_unknown() {
        let store = seeded_store();
        let ids = vec![
            "a1".to_string(),
            "b1".to_string(),
            "nope".to_string(),
            "a2".to_string(),
        ];
        let outcome = store
            .bulk_update_status("user-a", &ids, AlertStatus::Resolved)
            .unwrap();
        assert_eq!(outcome.updated, vec!["a1", "a2"]);
        assert_eq!(outcome.skipped, vec!["b1", "nope"]);

        let foreign = store.get_for_owner("user-b", "b1").unwrap();
        assert_eq!(foreign.status, AlertStatus::Active);
        let own = store.get_for_owner("user-a", "a2").unwrap();
        assert_eq!(own.status, AlertStatus::Resolved);
    }

    #[test]
    fn test_list_with_status_filter() {
        let store = seeded_store();
        store
            .update_status_for_owner("user-a", "a2", AlertStatus::FalsePositive)
            .unwrap();
        let page = store
            .list_for_owner(
                "user-a",
                &ListParams {
                    status: Some("active".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, "a1");
        assert!(store.find_by_job("j2").unwrap().is_some());
    }
}
