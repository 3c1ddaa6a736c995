//! Database schema definitions
//!
//! This module contains the SQL schema for the job queue and the domain
//! tables the pipelines write into. The job and event tables are shared
//! with the admin application, which creates jobs; this worker owns the
//! claim/lock columns.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Shared job queue
CREATE TABLE IF NOT EXISTS scraper_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    payload TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 10,
    run_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    lock_token TEXT,
    locked_at TEXT,
    progress_completed INTEGER NOT NULL DEFAULT 0,
    progress_total INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_run_at ON scraper_jobs(status, run_at);
CREATE INDEX IF NOT EXISTS idx_jobs_priority ON scraper_jobs(priority, created_at);

-- Append-only audit trail; never updated or deleted
CREATE TABLE IF NOT EXISTS scraper_job_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES scraper_jobs(id),
    event_type TEXT NOT NULL,
    payload TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_events_job ON scraper_job_events(job_id);

-- Employers under campaign
CREATE TABLE IF NOT EXISTS employers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    enterprise_agreement_status INTEGER NOT NULL DEFAULT 0,
    incolink_id TEXT,
    incolink_last_matched TEXT
);

-- One EBA record per employer, sourced from the FWC document search
CREATE TABLE IF NOT EXISTS eba_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    employer_id INTEGER NOT NULL UNIQUE REFERENCES employers(id),
    title TEXT NOT NULL,
    agreement_type TEXT,
    status TEXT,
    approved_date TEXT,
    expiry_date TEXT,
    lodgement_number TEXT,
    document_url TEXT,
    summary_url TEXT,
    comments TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Workers reconciled from Incolink invoices
CREATE TABLE IF NOT EXISTS workers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    surname TEXT NOT NULL,
    incolink_member_id TEXT,
    union_membership_status TEXT NOT NULL DEFAULT 'unknown',
    incolink_last_matched TEXT
);

CREATE INDEX IF NOT EXISTS idx_workers_member_id ON workers(incolink_member_id);
CREATE INDEX IF NOT EXISTS idx_workers_name ON workers(surname, first_name);

-- Worker/employer placements; an open placement has end_date IS NULL
CREATE TABLE IF NOT EXISTS worker_placements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker_id INTEGER NOT NULL REFERENCES workers(id),
    employer_id INTEGER NOT NULL REFERENCES employers(id),
    start_date TEXT NOT NULL,
    end_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_placements_pair ON worker_placements(worker_id, employer_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
