//! Storage traits and error types
//!
//! This module defines the trait interfaces for the job queue and the
//! domain tables. The queue trait is the sole lock-discipline boundary:
//! every mutation of a job row goes through it.

use crate::storage::{
    EmployerRecord, JobStatus, JobType, PlacementRecord, QueueStats, ScraperJob, StatusFields,
    WorkerRecord,
};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Employer not found: {0}")]
    EmployerNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Fields written into a new or updated EBA record
#[derive(Debug, Clone, Default)]
pub struct EbaRecordInput {
    pub title: String,
    pub agreement_type: Option<String>,
    pub status: Option<String>,
    pub approved_date: Option<String>,
    pub expiry_date: Option<String>,
    pub lodgement_number: Option<String>,
    pub document_url: Option<String>,
    pub summary_url: Option<String>,
}

/// Trait for job-queue persistence.
///
/// Reservation uses a conditional claim (compare-and-swap over the job
/// row) so multiple worker processes can poll the same table safely; at
/// most one can win the claim for a given job.
pub trait JobQueue {
    /// Attempts to claim the next eligible job.
    ///
    /// Selects up to `batch` candidates with `status = queued`, a supported
    /// job type, and `run_at <= now`, ordered by `(priority, created_at)`,
    /// then tries a conditional claim on each in order. Losing a claim race
    /// is not an error; the next candidate is tried. Returns `Ok(None)`
    /// when no candidate yields a successful claim.
    fn reserve(&mut self, batch: u32) -> StorageResult<Option<ScraperJob>>;

    /// Appends an audit event for a job.
    ///
    /// Insert failure is a hard error: it signals persistence failure,
    /// not a business condition.
    fn append_event(
        &mut self,
        job_id: i64,
        event_type: &str,
        payload: Option<&serde_json::Value>,
    ) -> StorageResult<()>;

    /// Merges progress counters into the job row
    fn update_progress(
        &mut self,
        job_id: i64,
        completed: u32,
        total: Option<u32>,
    ) -> StorageResult<()>;

    /// Sets the job status, merging optional extra fields.
    ///
    /// `completed_at` is stamped automatically for terminal statuses.
    fn mark_job_status(
        &mut self,
        job_id: i64,
        status: JobStatus,
        fields: StatusFields,
    ) -> StorageResult<()>;

    /// Unconditionally clears `lock_token` and `locked_at`.
    ///
    /// Called after every job attempt regardless of outcome so a live
    /// worker never leaves a job permanently locked.
    fn release_job_lock(&mut self, job_id: i64) -> StorageResult<()>;

    /// Recovers jobs whose worker crashed without releasing its lock.
    ///
    /// Running rows with `locked_at` older than the timeout are reset to
    /// queued with the lock cleared and `run_at = now`. Returns the number
    /// of rows recovered.
    fn cleanup_stale_locks(&mut self, lock_timeout: Duration) -> StorageResult<u32>;

    /// Resets a job row after the shutdown grace window elapsed while the
    /// job was still in flight
    fn force_requeue(&mut self, job_id: i64, reason: &str) -> StorageResult<()>;

    /// Inserts a new queued job (operational seeding and tests; the admin
    /// application is the usual producer)
    fn enqueue(
        &mut self,
        job_type: JobType,
        payload: &serde_json::Value,
        priority: i64,
        max_attempts: u32,
    ) -> StorageResult<i64>;

    /// Fetches a job row by id
    fn get_job(&self, job_id: i64) -> StorageResult<ScraperJob>;

    /// Counts jobs by status
    fn queue_stats(&self) -> StorageResult<QueueStats>;
}

/// Trait for the domain tables the pipelines write into
pub trait DomainStore {
    /// Loads employers by id, preserving the requested order
    fn get_employers(&self, ids: &[i64]) -> StorageResult<Vec<EmployerRecord>>;

    /// Inserts a new employer (tests and seeding)
    fn create_employer(&mut self, name: &str, incolink_id: Option<&str>) -> StorageResult<i64>;

    /// Inserts or updates the employer's EBA record.
    ///
    /// Returns true when a new record was inserted, false when an existing
    /// record was updated. The comments field records which branch ran.
    fn upsert_eba_record(&mut self, employer_id: i64, input: &EbaRecordInput)
        -> StorageResult<bool>;

    /// Sets the employer's boolean EBA-status flag
    fn set_employer_eba_flag(&mut self, employer_id: i64, value: bool) -> StorageResult<()>;

    /// Exact match on Incolink member number
    fn find_worker_by_member_number(&self, member_number: &str)
        -> StorageResult<Option<WorkerRecord>>;

    /// Case-insensitive first/last name match
    fn find_worker_by_name(
        &self,
        first_name: &str,
        surname: &str,
    ) -> StorageResult<Option<WorkerRecord>>;

    /// Creates a worker with `union_membership_status = 'unknown'`
    fn create_worker(
        &mut self,
        first_name: &str,
        surname: &str,
        member_number: Option<&str>,
    ) -> StorageResult<i64>;

    /// Backfills a missing member number; never overwrites an existing one
    fn backfill_member_number(&mut self, worker_id: i64, member_number: &str) -> StorageResult<()>;

    /// Finds an open placement (`end_date IS NULL`) for (worker, employer)
    fn find_open_placement(
        &self,
        worker_id: i64,
        employer_id: i64,
    ) -> StorageResult<Option<PlacementRecord>>;

    /// Inserts a new placement starting on the given date
    fn insert_placement(
        &mut self,
        worker_id: i64,
        employer_id: i64,
        start_date: &str,
    ) -> StorageResult<i64>;

    /// Stamps `incolink_last_matched` on a worker
    fn stamp_worker_incolink_matched(&mut self, worker_id: i64, date: &str) -> StorageResult<()>;

    /// Stamps `incolink_last_matched` on an employer
    fn stamp_employer_incolink_matched(
        &mut self,
        employer_id: i64,
        date: &str,
    ) -> StorageResult<()>;
}
