//! Owner-scoped access to jobs and alerts.
//!
//! Stores convert between raw repository rows and domain types, and enforce
//! that a caller only ever sees their own records.

pub mod alert_store;
pub mod job_store;

pub use alert_store::{AlertStore, BulkUpdateOutcome};
pub use job_store::{JobStore, NewJob, TerminalWrite};

use serde::Deserialize;

use crate::error::JobError;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u64 = 20;
/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u64 = 100;

/// Listing parameters shared by job and alert queries.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListParams {
    /// Effective page size: default when absent, capped, never zero.
    pub fn limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// Resolves ownership of a fetched record for `caller`.
fn ensure_owner(owner_id: &str, caller: &str) -> Result<(), JobError> {
    if owner_id == caller {
        Ok(())
    } else {
        Err(JobError::AccessDenied)
    }
}
