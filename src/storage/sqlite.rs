//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the [`JobQueue`]
//! and [`DomainStore`] traits over a single connection.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DomainStore, EbaRecordInput, JobQueue, StorageError, StorageResult};
use crate::storage::{
    EmployerRecord, JobEvent, JobStatus, JobType, PlacementRecord, QueueStats, ScraperJob,
    StatusFields, WorkerRecord,
};
use crate::WorkerError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Message stamped into `last_error` when a stale lock is recovered
const STALE_LOCK_MESSAGE: &str = "reset after stale lock (worker presumed crashed)";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(WorkerError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, WorkerError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for concurrent pollers
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        // Initialize schema
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self, WorkerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Counts audit events of a given type for a job (debug/ops visibility)
    pub fn count_events(&self, job_id: i64, event_type: &str) -> StorageResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM scraper_job_events WHERE job_id = ?1 AND event_type = ?2",
            params![job_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Lists all audit events for a job in insertion order
    pub fn list_events(&self, job_id: i64) -> StorageResult<Vec<JobEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, event_type, payload, created_at
             FROM scraper_job_events WHERE job_id = ?1 ORDER BY id ASC",
        )?;

        let events = stmt
            .query_map(params![job_id], |row| {
                Ok(JobEvent {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Fetches an EBA record for an employer, if one exists
    pub fn get_eba_record(&self, employer_id: i64) -> StorageResult<Option<EbaRecordRow>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, title, status, lodgement_number, document_url, comments
                 FROM eba_records WHERE employer_id = ?1",
                params![employer_id],
                |row| {
                    Ok(EbaRecordRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        status: row.get(2)?,
                        lodgement_number: row.get(3)?,
                        document_url: row.get(4)?,
                        comments: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn map_job(row: &Row<'_>) -> rusqlite::Result<ScraperJob> {
        let job_type_str: String = row.get(1)?;
        let status_str: String = row.get(2)?;
        Ok(ScraperJob {
            id: row.get(0)?,
            // Unknown strings cannot appear here: reserve filters on the
            // supported set and enqueue only writes known types
            job_type: JobType::from_db_string(&job_type_str).unwrap_or(JobType::FwcLookup),
            status: JobStatus::from_db_string(&status_str).unwrap_or(JobStatus::Failed),
            payload: row.get(3)?,
            priority: row.get(4)?,
            run_at: row.get(5)?,
            attempts: row.get(6)?,
            max_attempts: row.get(7)?,
            lock_token: row.get(8)?,
            locked_at: row.get(9)?,
            progress_completed: row.get(10)?,
            progress_total: row.get(11)?,
            last_error: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }
}

#[cfg(test)]
impl SqliteStorage {
    /// Direct SQL access for tests that reshape rows or install failure
    /// triggers
    pub(crate) fn execute_sql(&self, sql: &str) -> rusqlite::Result<usize> {
        self.conn.execute(sql, [])
    }
}

const JOB_COLUMNS: &str = "id, job_type, status, payload, priority, run_at, attempts, \
     max_attempts, lock_token, locked_at, progress_completed, progress_total, \
     last_error, created_at, updated_at, completed_at";

fn now_string() -> String {
    Utc::now().to_rfc3339()
}

impl JobQueue for SqliteStorage {
    fn reserve(&mut self, batch: u32) -> StorageResult<Option<ScraperJob>> {
        let now = now_string();

        let type_list = JobType::ALL
            .iter()
            .map(|t| format!("'{}'", t.to_db_string()))
            .collect::<Vec<_>>()
            .join(", ");

        // Candidate pass: cheap read, no locks taken
        let candidate_ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id FROM scraper_jobs
                 WHERE status = 'queued'
                   AND job_type IN ({})
                   AND run_at <= ?1
                 ORDER BY priority ASC, created_at ASC
                 LIMIT ?2",
                type_list
            ))?;
            let ids = stmt
                .query_map(params![now, batch], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        for candidate_id in candidate_ids {
            let lock_token = Uuid::new_v4().to_string();
            let now = now_string();

            // Conditional claim: zero affected rows means another worker
            // won the race, which is not an error
            let changed = self.conn.execute(
                "UPDATE scraper_jobs
                 SET lock_token = ?1, status = 'running', attempts = attempts + 1,
                     locked_at = ?2, last_error = NULL, updated_at = ?2
                 WHERE id = ?3 AND status = 'queued' AND run_at <= ?2
                   AND lock_token IS NULL",
                params![lock_token, now, candidate_id],
            )?;

            if changed == 0 {
                tracing::debug!("Lost claim race for job {}, trying next", candidate_id);
                continue;
            }

            self.append_event(
                candidate_id,
                "job_locked",
                Some(&serde_json::json!({ "lock_token": lock_token })),
            )?;

            return Ok(Some(self.get_job(candidate_id)?));
        }

        Ok(None)
    }

    fn append_event(
        &mut self,
        job_id: i64,
        event_type: &str,
        payload: Option<&serde_json::Value>,
    ) -> StorageResult<()> {
        let payload_text = payload.map(|p| p.to_string());
        self.conn.execute(
            "INSERT INTO scraper_job_events (job_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, event_type, payload_text, now_string()],
        )?;
        Ok(())
    }

    fn update_progress(
        &mut self,
        job_id: i64,
        completed: u32,
        total: Option<u32>,
    ) -> StorageResult<()> {
        let now = now_string();
        self.conn.execute(
            "UPDATE scraper_jobs SET progress_completed = ?1, updated_at = ?2 WHERE id = ?3",
            params![completed, now, job_id],
        )?;

        if let Some(total) = total {
            self.conn.execute(
                "UPDATE scraper_jobs SET progress_total = ?1 WHERE id = ?2",
                params![total, job_id],
            )?;
        }

        Ok(())
    }

    fn mark_job_status(
        &mut self,
        job_id: i64,
        status: JobStatus,
        fields: StatusFields,
    ) -> StorageResult<()> {
        let now = now_string();

        let changed = self.conn.execute(
            "UPDATE scraper_jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }

        if status.is_terminal() {
            self.conn.execute(
                "UPDATE scraper_jobs SET completed_at = ?1 WHERE id = ?2",
                params![now, job_id],
            )?;
        }

        if let Some(last_error) = fields.last_error {
            self.conn.execute(
                "UPDATE scraper_jobs SET last_error = ?1 WHERE id = ?2",
                params![last_error, job_id],
            )?;
        }

        if fields.clear_lock {
            self.conn.execute(
                "UPDATE scraper_jobs SET lock_token = NULL, locked_at = NULL WHERE id = ?1",
                params![job_id],
            )?;
        }

        if fields.reset_progress {
            self.conn.execute(
                "UPDATE scraper_jobs SET progress_completed = 0 WHERE id = ?1",
                params![job_id],
            )?;
        }

        if let Some(run_at) = fields.run_at {
            self.conn.execute(
                "UPDATE scraper_jobs SET run_at = ?1 WHERE id = ?2",
                params![run_at, job_id],
            )?;
        }

        Ok(())
    }

    fn release_job_lock(&mut self, job_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE scraper_jobs SET lock_token = NULL, locked_at = NULL, updated_at = ?1
             WHERE id = ?2",
            params![now_string(), job_id],
        )?;
        Ok(())
    }

    fn cleanup_stale_locks(&mut self, lock_timeout: Duration) -> StorageResult<u32> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(lock_timeout)
                .map_err(|e| StorageError::Database(e.to_string()))?)
        .to_rfc3339();
        let now = now_string();

        let recovered = self.conn.execute(
            "UPDATE scraper_jobs
             SET status = 'queued', lock_token = NULL, locked_at = NULL,
                 last_error = ?1, run_at = ?2, updated_at = ?2
             WHERE status = 'running' AND locked_at IS NOT NULL AND locked_at < ?3",
            params![STALE_LOCK_MESSAGE, now, cutoff],
        )?;

        Ok(recovered as u32)
    }

    fn force_requeue(&mut self, job_id: i64, reason: &str) -> StorageResult<()> {
        let now = now_string();
        self.conn.execute(
            "UPDATE scraper_jobs
             SET status = 'queued', lock_token = NULL, locked_at = NULL,
                 last_error = ?1, run_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![reason, now, job_id],
        )?;
        Ok(())
    }

    fn enqueue(
        &mut self,
        job_type: JobType,
        payload: &serde_json::Value,
        priority: i64,
        max_attempts: u32,
    ) -> StorageResult<i64> {
        let now = now_string();
        self.conn.execute(
            "INSERT INTO scraper_jobs
             (job_type, status, payload, priority, run_at, max_attempts, created_at, updated_at)
             VALUES (?1, 'queued', ?2, ?3, ?4, ?5, ?4, ?4)",
            params![
                job_type.to_db_string(),
                payload.to_string(),
                priority,
                now,
                max_attempts
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_job(&self, job_id: i64) -> StorageResult<ScraperJob> {
        let sql = format!("SELECT {} FROM scraper_jobs WHERE id = ?1", JOB_COLUMNS);
        self.conn
            .query_row(&sql, params![job_id], Self::map_job)
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))
    }

    fn queue_stats(&self) -> StorageResult<QueueStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM scraper_jobs GROUP BY status")?;

        let mut stats = QueueStats::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            match JobStatus::from_db_string(&status) {
                Some(JobStatus::Queued) => stats.queued = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Succeeded) => stats.succeeded = count,
                Some(JobStatus::Failed) => stats.failed = count,
                Some(JobStatus::Cancelled) => stats.cancelled = count,
                None => {}
            }
        }

        Ok(stats)
    }
}

/// A subset of an EBA record used for verification and the admin views
#[derive(Debug, Clone)]
pub struct EbaRecordRow {
    pub id: i64,
    pub title: String,
    pub status: Option<String>,
    pub lodgement_number: Option<String>,
    pub document_url: Option<String>,
    pub comments: Option<String>,
}

impl DomainStore for SqliteStorage {
    fn get_employers(&self, ids: &[i64]) -> StorageResult<Vec<EmployerRecord>> {
        let mut employers = Vec::with_capacity(ids.len());

        for &id in ids {
            let employer = self
                .conn
                .query_row(
                    "SELECT id, name, enterprise_agreement_status, incolink_id,
                            incolink_last_matched
                     FROM employers WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(EmployerRecord {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            enterprise_agreement_status: row.get::<_, i64>(2)? != 0,
                            incolink_id: row.get(3)?,
                            incolink_last_matched: row.get(4)?,
                        })
                    },
                )
                .optional()?
                .ok_or(StorageError::EmployerNotFound(id))?;
            employers.push(employer);
        }

        Ok(employers)
    }

    fn create_employer(&mut self, name: &str, incolink_id: Option<&str>) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO employers (name, incolink_id) VALUES (?1, ?2)",
            params![name, incolink_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn upsert_eba_record(
        &mut self,
        employer_id: i64,
        input: &EbaRecordInput,
    ) -> StorageResult<bool> {
        let now = now_string();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM eba_records WHERE employer_id = ?1",
                params![employer_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(record_id) => {
                self.conn.execute(
                    "UPDATE eba_records
                     SET title = ?1, agreement_type = ?2, status = ?3, approved_date = ?4,
                         expiry_date = ?5, lodgement_number = ?6, document_url = ?7,
                         summary_url = ?8, comments = ?9, updated_at = ?10
                     WHERE id = ?11",
                    params![
                        input.title,
                        input.agreement_type,
                        input.status,
                        input.approved_date,
                        input.expiry_date,
                        input.lodgement_number,
                        input.document_url,
                        input.summary_url,
                        "Updated from FWC document search",
                        now,
                        record_id
                    ],
                )?;
                Ok(false)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO eba_records
                     (employer_id, title, agreement_type, status, approved_date, expiry_date,
                      lodgement_number, document_url, summary_url, comments, created_at,
                      updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                    params![
                        employer_id,
                        input.title,
                        input.agreement_type,
                        input.status,
                        input.approved_date,
                        input.expiry_date,
                        input.lodgement_number,
                        input.document_url,
                        input.summary_url,
                        "Linked from FWC document search",
                        now
                    ],
                )?;
                Ok(true)
            }
        }
    }

    fn set_employer_eba_flag(&mut self, employer_id: i64, value: bool) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE employers SET enterprise_agreement_status = ?1 WHERE id = ?2",
            params![value as i64, employer_id],
        )?;
        if changed == 0 {
            return Err(StorageError::EmployerNotFound(employer_id));
        }
        Ok(())
    }

    fn find_worker_by_member_number(
        &self,
        member_number: &str,
    ) -> StorageResult<Option<WorkerRecord>> {
        let worker = self
            .conn
            .query_row(
                "SELECT id, first_name, surname, incolink_member_id, union_membership_status
                 FROM workers WHERE incolink_member_id = ?1",
                params![member_number],
                map_worker,
            )
            .optional()?;
        Ok(worker)
    }

    fn find_worker_by_name(
        &self,
        first_name: &str,
        surname: &str,
    ) -> StorageResult<Option<WorkerRecord>> {
        let worker = self
            .conn
            .query_row(
                "SELECT id, first_name, surname, incolink_member_id, union_membership_status
                 FROM workers
                 WHERE LOWER(first_name) = LOWER(?1) AND LOWER(surname) = LOWER(?2)",
                params![first_name, surname],
                map_worker,
            )
            .optional()?;
        Ok(worker)
    }

    fn create_worker(
        &mut self,
        first_name: &str,
        surname: &str,
        member_number: Option<&str>,
    ) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO workers (first_name, surname, incolink_member_id, union_membership_status)
             VALUES (?1, ?2, ?3, 'unknown')",
            params![first_name, surname, member_number],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn backfill_member_number(&mut self, worker_id: i64, member_number: &str) -> StorageResult<()> {
        // The IS NULL guard keeps an existing member number authoritative
        self.conn.execute(
            "UPDATE workers SET incolink_member_id = ?1
             WHERE id = ?2 AND incolink_member_id IS NULL",
            params![member_number, worker_id],
        )?;
        Ok(())
    }

    fn find_open_placement(
        &self,
        worker_id: i64,
        employer_id: i64,
    ) -> StorageResult<Option<PlacementRecord>> {
        let placement = self
            .conn
            .query_row(
                "SELECT id, worker_id, employer_id, start_date, end_date
                 FROM worker_placements
                 WHERE worker_id = ?1 AND employer_id = ?2 AND end_date IS NULL",
                params![worker_id, employer_id],
                |row| {
                    Ok(PlacementRecord {
                        id: row.get(0)?,
                        worker_id: row.get(1)?,
                        employer_id: row.get(2)?,
                        start_date: row.get(3)?,
                        end_date: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(placement)
    }

    fn insert_placement(
        &mut self,
        worker_id: i64,
        employer_id: i64,
        start_date: &str,
    ) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO worker_placements (worker_id, employer_id, start_date)
             VALUES (?1, ?2, ?3)",
            params![worker_id, employer_id, start_date],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn stamp_worker_incolink_matched(&mut self, worker_id: i64, date: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE workers SET incolink_last_matched = ?1 WHERE id = ?2",
            params![date, worker_id],
        )?;
        Ok(())
    }

    fn stamp_employer_incolink_matched(
        &mut self,
        employer_id: i64,
        date: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE employers SET incolink_last_matched = ?1 WHERE id = ?2",
            params![date, employer_id],
        )?;
        Ok(())
    }
}

fn map_worker(row: &Row<'_>) -> rusqlite::Result<WorkerRecord> {
    Ok(WorkerRecord {
        id: row.get(0)?,
        first_name: row.get(1)?,
        surname: row.get(2)?,
        incolink_member_id: row.get(3)?,
        union_membership_status: row.get(4)?,
    })
}
