//! Storage module for the shared job table and domain tables
//!
//! This module handles all database operations for the worker, including:
//! - Job reservation with optimistic locking and stale-lock recovery
//! - Append-only job event logging
//! - Progress and status updates
//! - Domain-table side effects (employers, EBA records, workers, placements)

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{EbaRecordRow, SqliteStorage};
pub use traits::{DomainStore, EbaRecordInput, JobQueue, StorageError, StorageResult};

use crate::WorkerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(WorkerError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, WorkerError> {
    SqliteStorage::new(path)
}

/// Job types this worker knows how to execute.
///
/// Rows with any other `job_type` value are never selected as reservation
/// candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    FwcLookup,
    IncolinkSync,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::FwcLookup, JobType::IncolinkSync];

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::FwcLookup => "fwc_lookup",
            Self::IncolinkSync => "incolink_sync",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fwc_lookup" => Some(Self::FwcLookup),
            "incolink_sync" => Some(Self::IncolinkSync),
            _ => None,
        }
    }
}

/// Lifecycle status of a job row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Returns true if no further transition can occur
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A row from the shared `scraper_jobs` table.
///
/// A non-null `lock_token` together with `status = running` marks the row as
/// owned by exactly one worker instance; only the owner clears its own token.
#[derive(Debug, Clone)]
pub struct ScraperJob {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Raw payload JSON; decoded into a [`JobPayload`] at dispatch time
    pub payload: String,
    pub priority: i64,
    pub run_at: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub lock_token: Option<String>,
    pub locked_at: Option<String>,
    pub progress_completed: u32,
    pub progress_total: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Optional fields merged into a job row alongside a status change
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    pub last_error: Option<Option<String>>,
    pub clear_lock: bool,
    pub reset_progress: bool,
    pub run_at: Option<String>,
}

/// Decoded job payload, discriminated by `job_type`.
///
/// Decoding happens once at dispatch; pipelines never poke at loose JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    FwcLookup(FwcLookupPayload),
    IncolinkSync(IncolinkSyncPayload),
}

impl JobPayload {
    /// Decodes a payload for the given job type, validating its shape
    pub fn decode(job_type: JobType, raw: &str) -> Result<Self, WorkerError> {
        let invalid = |e: serde_json::Error| WorkerError::InvalidPayload {
            job_type: job_type.to_db_string().to_string(),
            message: e.to_string(),
        };

        match job_type {
            JobType::FwcLookup => {
                let payload: FwcLookupPayload = serde_json::from_str(raw).map_err(invalid)?;
                if payload.employer_ids.is_empty() {
                    return Err(WorkerError::InvalidPayload {
                        job_type: job_type.to_db_string().to_string(),
                        message: "employer_ids is empty".to_string(),
                    });
                }
                Ok(Self::FwcLookup(payload))
            }
            JobType::IncolinkSync => {
                let payload: IncolinkSyncPayload = serde_json::from_str(raw).map_err(invalid)?;
                if payload.employer_ids.is_empty() {
                    return Err(WorkerError::InvalidPayload {
                        job_type: job_type.to_db_string().to_string(),
                        message: "employer_ids is empty".to_string(),
                    });
                }
                Ok(Self::IncolinkSync(payload))
            }
        }
    }
}

/// Payload for `fwc_lookup` jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FwcLookupPayload {
    pub employer_ids: Vec<i64>,

    /// Apply the best search result automatically instead of logging
    /// candidates for manual review
    #[serde(default)]
    pub auto_link: bool,

    /// Per-employer search-term overrides, keyed by employer id
    #[serde(default)]
    pub search_overrides: HashMap<i64, String>,
}

/// Payload for `incolink_sync` jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncolinkSyncPayload {
    pub employer_ids: Vec<i64>,

    /// Explicit invoice number; when absent the pipeline auto-detects one
    #[serde(default)]
    pub invoice_number: Option<String>,
}

/// An append-only audit record for a job
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: i64,
    pub event_type: String,
    pub payload: Option<String>,
    pub created_at: String,
}

/// An employer row, as seen by the pipelines
#[derive(Debug, Clone)]
pub struct EmployerRecord {
    pub id: i64,
    pub name: String,
    pub enterprise_agreement_status: bool,
    pub incolink_id: Option<String>,
    pub incolink_last_matched: Option<String>,
}

/// A worker (person) row used by Incolink reconciliation
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: i64,
    pub first_name: String,
    pub surname: String,
    pub incolink_member_id: Option<String>,
    pub union_membership_status: String,
}

/// A placement row linking a worker to an employer
#[derive(Debug, Clone)]
pub struct PlacementRecord {
    pub id: i64,
    pub worker_id: i64,
    pub employer_id: i64,
    pub start_date: String,
    pub end_date: Option<String>,
}

/// Counts by status for the `--stats` CLI mode
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queued: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
}
