//! Incolink sync orchestration
//!
//! Drives the browser through login, employer lookup, invoice selection and
//! member extraction, then reconciles the extracted members against the
//! workers and placements tables. Employers run strictly sequentially on a
//! fresh page each; a failure on one employer is recorded and never aborts
//! the rest of the job.

use crate::browser::{Browser, Page};
use crate::config::{BrowserConfig, IncolinkConfig, WorkerConfig};
use crate::incolink::extract::{self, InvoiceExtract};
use crate::storage::{
    DomainStore, EmployerRecord, IncolinkSyncPayload, JobQueue, ScraperJob, SqliteStorage,
};
use crate::{Result, WorkerError};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Job-level result counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncolinkOutcome {
    pub succeeded: u32,
    pub failed: u32,
    /// Employers without an Incolink account number
    pub skipped: u32,
    pub workers_created: u32,
    pub workers_matched: u32,
    pub placements_created: u32,
    pub placements_skipped: u32,
}

/// Reconciliation counts for one employer
#[derive(Debug, Clone, Default, Serialize)]
struct SyncCounts {
    workers_created: u32,
    workers_matched: u32,
    placements_created: u32,
    placements_skipped: u32,
}

/// Pipeline for `incolink_sync` jobs
pub struct IncolinkSyncPipeline {
    storage: Arc<Mutex<SqliteStorage>>,
    browser: Arc<dyn Browser>,
    incolink: IncolinkConfig,
    browser_config: BrowserConfig,
    employer_delay: Duration,
}

impl IncolinkSyncPipeline {
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        browser: Arc<dyn Browser>,
        incolink: IncolinkConfig,
        browser_config: BrowserConfig,
        worker_config: &WorkerConfig,
    ) -> Self {
        Self {
            storage,
            browser,
            incolink,
            browser_config,
            employer_delay: worker_config.employer_delay(),
        }
    }

    /// Runs the pipeline for one claimed job
    pub async fn run(
        &self,
        job: &ScraperJob,
        payload: &IncolinkSyncPayload,
    ) -> Result<IncolinkOutcome> {
        let employers = {
            let storage = self.storage.lock().unwrap();
            storage.get_employers(&payload.employer_ids)?
        };

        {
            let mut storage = self.storage.lock().unwrap();
            storage.update_progress(job.id, 0, Some(employers.len() as u32))?;
        }

        let mut outcome = IncolinkOutcome::default();

        for (index, employer) in employers.iter().enumerate() {
            let incolink_id = employer.incolink_id.as_deref().unwrap_or("").trim();

            if incolink_id.is_empty() {
                tracing::warn!(
                    "Employer {} has no Incolink account number, skipping",
                    employer.id
                );
                let mut storage = self.storage.lock().unwrap();
                storage.append_event(
                    job.id,
                    "incolink_employer_skipped",
                    Some(&serde_json::json!({
                        "employer_id": employer.id,
                        "reason": "no incolink id",
                    })),
                )?;
                outcome.skipped += 1;
            } else {
                match self.sync_employer(job, employer, incolink_id, payload).await {
                    Ok(counts) => {
                        outcome.succeeded += 1;
                        outcome.workers_created += counts.workers_created;
                        outcome.workers_matched += counts.workers_matched;
                        outcome.placements_created += counts.placements_created;
                        outcome.placements_skipped += counts.placements_skipped;
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        tracing::warn!("Incolink sync failed for employer {}: {}", employer.id, e);
                        self.record_employer_failure(job, employer, &e)?;
                    }
                }
            }

            {
                let mut storage = self.storage.lock().unwrap();
                storage.update_progress(job.id, (index + 1) as u32, None)?;
            }

            if index + 1 < employers.len() {
                tokio::time::sleep(self.employer_delay).await;
            }
        }

        Ok(outcome)
    }

    /// Syncs one employer on a fresh page; the page is closed regardless of
    /// the outcome
    async fn sync_employer(
        &self,
        job: &ScraperJob,
        employer: &EmployerRecord,
        incolink_id: &str,
        payload: &IncolinkSyncPayload,
    ) -> Result<SyncCounts> {
        let page = self.browser.new_page().await?;
        let result = self
            .drive_employer(&*page, job, employer, incolink_id, payload)
            .await;

        if let Err(e) = page.close_page().await {
            tracing::debug!("page close failed: {}", e);
        }

        result
    }

    async fn drive_employer(
        &self,
        page: &dyn Page,
        job: &ScraperJob,
        employer: &EmployerRecord,
        incolink_id: &str,
        payload: &IncolinkSyncPayload,
    ) -> Result<SyncCounts> {
        extract::login(page, &self.incolink, &self.browser_config).await?;
        extract::lookup_employer(page, incolink_id, &self.browser_config).await?;

        let invoice = extract::select_invoice(
            page,
            payload.invoice_number.as_deref(),
            &self.browser_config,
        )
        .await?;

        let extracted = extract::extract_members(page, &self.browser_config).await?;

        tracing::info!(
            "Invoice {} for employer {}: {} members, date {:?}",
            invoice,
            employer.id,
            extracted.members.len(),
            extracted.invoice_date
        );

        let counts = self.persist_members(employer, &extracted)?;

        {
            let mut storage = self.storage.lock().unwrap();
            storage.append_event(
                job.id,
                "incolink_employer_succeeded",
                Some(&serde_json::json!({
                    "employer_id": employer.id,
                    "invoice_number": invoice,
                    "invoice_date": extracted.invoice_date,
                    "member_count": extracted.members.len(),
                    "counts": counts,
                })),
            )?;
        }

        Ok(counts)
    }

    /// Reconciles extracted members against the workers and placements
    /// tables.
    ///
    /// Match order per member: exact member-number match, then
    /// case-insensitive name match (backfilling a missing member number),
    /// then creation as a new worker. A worker with an open placement at
    /// this employer is left alone; otherwise a placement starting today is
    /// inserted.
    fn persist_members(
        &self,
        employer: &EmployerRecord,
        extracted: &InvoiceExtract,
    ) -> Result<SyncCounts> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let mut counts = SyncCounts::default();

        let mut storage = self.storage.lock().unwrap();

        for member in &extracted.members {
            let worker_id = self.resolve_worker(&mut storage, member, &mut counts)?;

            if storage.find_open_placement(worker_id, employer.id)?.is_some() {
                counts.placements_skipped += 1;
            } else {
                storage.insert_placement(worker_id, employer.id, &today)?;
                counts.placements_created += 1;
            }

            if let Some(date) = &extracted.invoice_date {
                storage.stamp_worker_incolink_matched(worker_id, date)?;
            }
        }

        if let Some(date) = &extracted.invoice_date {
            storage.stamp_employer_incolink_matched(employer.id, date)?;
        }

        Ok(counts)
    }

    fn resolve_worker(
        &self,
        storage: &mut SqliteStorage,
        member: &crate::incolink::MemberRecord,
        counts: &mut SyncCounts,
    ) -> Result<i64> {
        if let Some(number) = &member.member_number {
            if let Some(worker) = storage.find_worker_by_member_number(number)? {
                counts.workers_matched += 1;
                return Ok(worker.id);
            }
        }

        if let Some(worker) =
            storage.find_worker_by_name(&member.given_names, &member.surname)?
        {
            counts.workers_matched += 1;
            if worker.incolink_member_id.is_none() {
                if let Some(number) = &member.member_number {
                    storage.backfill_member_number(worker.id, number)?;
                    tracing::debug!(
                        "Backfilled member number {} for worker {}",
                        number,
                        worker.id
                    );
                }
            }
            return Ok(worker.id);
        }

        let id = storage.create_worker(
            &member.given_names,
            &member.surname,
            member.member_number.as_deref(),
        )?;
        counts.workers_created += 1;
        Ok(id)
    }

    /// Records an employer-scoped failure on the audit trail
    fn record_employer_failure(
        &self,
        job: &ScraperJob,
        employer: &EmployerRecord,
        error: &WorkerError,
    ) -> Result<()> {
        let context = match error {
            WorkerError::Scrape(scrape) => Some(scrape.event_payload()),
            _ => None,
        };

        let mut storage = self.storage.lock().unwrap();
        storage.append_event(
            job.id,
            "incolink_employer_failed",
            Some(&serde_json::json!({
                "employer_id": employer.id,
                "error": error.to_string(),
                "context": context,
            })),
        )?;
        Ok(())
    }
}
