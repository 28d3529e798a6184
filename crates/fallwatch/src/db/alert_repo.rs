//! Alert repository: CRUD for the `alerts` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw alert row from the database.
#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: String,
    pub owner_id: String,
    pub source_job_id: Option<String>,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub confidence: Option<f64>,
    pub location: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl AlertRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            source_job_id: row.get("source_job_id")?,
            kind: row.get("kind")?,
            severity: row.get("severity")?,
            message: row.get("message")?,
            confidence: row.get("confidence")?,
            location: row.get("location")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for alert listing.
#[derive(Debug, Default, Clone)]
pub struct AlertFilter {
    pub owner_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new alert row. Takes a connection so it can join the
/// transaction that completes the source job.
pub fn insert(conn: &Connection, alert: &AlertRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO alerts (id, owner_id, source_job_id, kind, severity, message,
         confidence, location, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            alert.id,
            alert.owner_id,
            alert.source_job_id,
            alert.kind,
            alert.severity,
            alert.message,
            alert.confidence,
            alert.location,
            alert.status,
            alert.created_at,
            alert.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds an alert by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<AlertRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_in(conn, id))
}

/// Finds an alert by its ID on an already-locked connection or transaction.
pub fn find_by_id_in(conn: &Connection, id: &str) -> Result<Option<AlertRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM alerts WHERE id = ?1",
            params![id],
            AlertRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds the alert raised for a given analysis job, if any.
pub fn find_by_source_job(db: &Database, job_id: &str) -> Result<Option<AlertRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM alerts WHERE source_job_id = ?1",
                params![job_id],
                AlertRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Counts alerts raised for a given analysis job.
pub fn count_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE source_job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Queries alerts with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &AlertFilter) -> Result<(Vec<AlertRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref owner_id) = filter.owner_id {
            conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM alerts {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM alerts {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<AlertRow> = stmt
            .query_map(params_ref.as_slice(), AlertRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Updates the status of a single alert. Returns whether a row changed.
pub fn update_status(
    conn: &Connection,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE alerts SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status, updated_at],
    )?;
    Ok(changed == 1)
}

/// Returns the owner of an alert, or `None` when it does not exist.
pub fn owner_of(conn: &Connection, id: &str) -> Result<Option<String>, DatabaseError> {
    let owner = conn
        .query_row(
            "SELECT owner_id FROM alerts WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(owner)
}

/// Deletes every alert raised for a job. Returns the number removed.
pub fn delete_for_job(conn: &Connection, job_id: &str) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM alerts WHERE source_job_id = ?1",
        params![job_id],
    )?;
    Ok(removed)
}
