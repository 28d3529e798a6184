//! Job repository: CRUD and guarded transitions for the `analysis_jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub input_ref: String,
    pub original_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            input_ref: row.get("input_ref")?,
            original_name: row.get("original_name")?,
            location: row.get("location")?,
            description: row.get("description")?,
            status: row.get("status")?,
            result_json: row.get("result_json")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO analysis_jobs (id, owner_id, input_ref, original_name, location,
             description, status, result_json, error, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.owner_id,
                job.input_ref,
                job.original_name,
                job.location,
                job.description,
                job.status,
                job.result_json,
                job.error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_by_id_in(conn, id))
}

/// Finds a job by its ID on an already-locked connection or transaction.
pub fn find_by_id_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM analysis_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Queries jobs with filters, returning (rows, total_count).
///
/// Rows are newest first. Ties on `created_at` fall back to insertion order.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
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

        let count_sql = format!("SELECT COUNT(*) FROM analysis_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM analysis_jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Moves a `processing` job to `completed` with the given result.
///
/// Returns `false` when the job is missing or already terminal.
pub fn complete_if_processing(
    conn: &Connection,
    id: &str,
    result_json: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE analysis_jobs
         SET status = 'completed', result_json = ?2, error = NULL,
             updated_at = ?3, completed_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, result_json, now],
    )?;
    Ok(changed == 1)
}

/// Moves a `processing` job to `failed` with the given message.
///
/// Returns `false` when the job is missing or already terminal.
pub fn fail_if_processing(
    conn: &Connection,
    id: &str,
    error: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE analysis_jobs
         SET status = 'failed', error = ?2, result_json = NULL,
             updated_at = ?3, completed_at = ?3
         WHERE id = ?1 AND status = 'processing'",
        params![id, error, now],
    )?;
    Ok(changed == 1)
}

/// Deletes a job row. Returns whether a row was removed.
pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM analysis_jobs WHERE id = ?1", params![id])?;
    Ok(changed == 1)
}

/// Returns `processing` jobs last touched strictly before `before`.
pub fn find_stale_processing(db: &Database, before: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM analysis_jobs
             WHERE status = 'processing' AND updated_at < ?1
             ORDER BY updated_at ASC",
        )?;
        let rows = stmt
            .query_map(params![before], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            owner_id: "user-a".to_string(),
            input_ref: "/tmp/uploads/walk.mp4".to_string(),
            original_name: Some("walk.mp4".to_string()),
            location: Some("Living room".to_string()),
            description: None,
            status: "processing".to_string(),
            result_json: None,
            error: None,
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
            completed_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.owner_id, "user-a");
        assert_eq!(found.status, "processing");
        assert_eq!(found.location.as_deref(), Some("Living room"));
        assert!(found.result_json.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_complete_is_guarded() {
        let db = test_db();
        insert(&db, &sample_job("g1")).unwrap();

        let first = db
            .with_conn(|c| complete_if_processing(c, "g1", "{\"a\":1}", "2026-01-01T00:01:00.000000Z"))
            .unwrap();
        let second = db
            .with_conn(|c| fail_if_processing(c, "g1", "late", "2026-01-01T00:02:00.000000Z"))
            .unwrap();
        assert!(first);
        assert!(!second);

        let found = find_by_id(&db, "g1").unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert_eq!(found.result_json.as_deref(), Some("{\"a\":1}"));
        assert!(found.error.is_none());
        assert_eq!(found.updated_at, "2026-01-01T00:01:00.000000Z");
    }

    #[test]
    fn test_fail_missing_job() {
        let db = test_db();
        let changed = db
            .with_conn(|c| fail_if_processing(c, "ghost", "x", "2026-01-01T00:00:00.000000Z"))
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_query_scoped_to_owner() {
        let db = test_db();
        insert(&db, &sample_job("o1")).unwrap();
        let mut other = sample_job("o2");
        other.owner_id = "user-b".to_string();
        insert(&db, &other).unwrap();

        let (rows, total) = query(
            &db,
            &JobFilter {
                owner_id: Some("user-a".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "o1");
    }

    #[test]
    fn test_query_with_status_filter() {
        let db = test_db();
        insert(&db, &sample_job("s1")).unwrap();
        insert(&db, &sample_job("s2")).unwrap();
        db.with_conn(|c| fail_if_processing(c, "s2", "boom", "2026-01-01T00:05:00.000000Z"))
            .unwrap();

        let (rows, total) = query(
            &db,
            &JobFilter {
                status: Some("failed".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "s2");
    }

    #[test]
    fn test_query_pagination_newest_first() {
        let db = test_db();
        for i in 0..10 {
            let mut job = sample_job(&format!("p{}", i));
            job.created_at = format!("2026-01-{:02}T00:00:00.000000Z", i + 1);
            insert(&db, &job).unwrap();
        }

        let (rows, total) = query(
            &db,
            &JobFilter {
                limit: Some(3),
                offset: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 10);
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p8", "p7", "p6"]);
    }

    #[test]
    fn test_find_stale_processing() {
        let db = test_db();
        insert(&db, &sample_job("old")).unwrap();
        let mut fresh = sample_job("fresh");
        fresh.updated_at = "2026-01-02T00:00:00.000000Z".to_string();
        insert(&db, &fresh).unwrap();
        let mut done = sample_job("done");
        done.status = "completed".to_string();
        insert(&db, &done).unwrap();

        let stale = find_stale_processing(&db, "2026-01-01T12:00:00.000000Z").unwrap();
        let ids: Vec<_> = stale.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[test]
    fn test_delete_and_count() {
        let db = test_db();
        insert(&db, &sample_job("d1")).unwrap();
        insert(&db, &sample_job("d2")).unwrap();
        assert_eq!(count_by_status(&db, "processing").unwrap(), 2);

        assert!(db.with_conn(|c| delete(c, "d1")).unwrap());
        assert!(!db.with_conn(|c| delete(c, "d1")).unwrap());
        assert_eq!(count_by_status(&db, "processing").unwrap(), 1);
    }
}
