//! FWC lookup pipeline orchestration
//!
//! Employers are processed strictly sequentially with a politeness delay
//! between them. Per-employer failures are recorded on the audit trail and
//! never abort the rest of the job: the job as a whole only fails on
//! systemic errors such as being unable to load the employer list.

use crate::config::{FwcConfig, WorkerConfig};
use crate::fwc::query::build_query_candidates;
use crate::fwc::search::{FwcSearchClient, SearchPage};
use crate::fwc::SearchResult;
use crate::storage::{
    DomainStore, EbaRecordInput, EmployerRecord, FwcLookupPayload, JobQueue, ScraperJob,
    SqliteStorage,
};
use crate::{Result, ScrapeContext, ScrapeError, ScrapeStage, WorkerError};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Job-level result counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FwcOutcome {
    pub succeeded: u32,
    pub failed: u32,
}

/// Pipeline for `fwc_lookup` jobs
pub struct FwcLookupPipeline {
    storage: Arc<Mutex<SqliteStorage>>,
    search: FwcSearchClient,
    fwc_config: FwcConfig,
    employer_delay: std::time::Duration,
}

impl FwcLookupPipeline {
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        fwc_config: FwcConfig,
        worker_config: &WorkerConfig,
    ) -> Result<Self> {
        let search = FwcSearchClient::new(&fwc_config)?;
        Ok(Self {
            storage,
            search,
            fwc_config,
            employer_delay: worker_config.employer_delay(),
        })
    }

    /// Runs the pipeline for one claimed job
    pub async fn run(&self, job: &ScraperJob, payload: &FwcLookupPayload) -> Result<FwcOutcome> {
        // Job-setup scope: failure here fails the whole job
        let employers = {
            let storage = self.storage.lock().unwrap();
            storage.get_employers(&payload.employer_ids)?
        };

        {
            let mut storage = self.storage.lock().unwrap();
            storage.update_progress(job.id, 0, Some(employers.len() as u32))?;
        }

        let mut outcome = FwcOutcome::default();

        for (index, employer) in employers.iter().enumerate() {
            match self.process_employer(job, employer, payload).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!("FWC lookup failed for employer {}: {}", employer.id, e);
                    self.record_employer_failure(job, employer, &e)?;
                }
            }

            {
                let mut storage = self.storage.lock().unwrap();
                storage.update_progress(job.id, (index + 1) as u32, None)?;
            }

            // Politeness delay between employers
            if index + 1 < employers.len() {
                tokio::time::sleep(self.employer_delay).await;
            }
        }

        Ok(outcome)
    }

    /// Processes one employer: search ladder, parse, apply or log results
    async fn process_employer(
        &self,
        job: &ScraperJob,
        employer: &EmployerRecord,
        payload: &FwcLookupPayload,
    ) -> Result<()> {
        let override_term = payload.search_overrides.get(&employer.id).map(|s| s.as_str());
        let candidates = build_query_candidates(
            &employer.name,
            override_term,
            &self.fwc_config.query_prefix,
        );

        let mut results: Vec<SearchResult> = Vec::new();
        let mut winning_query: Option<String> = None;
        let mut last_empty: Option<SearchPage> = None;

        for candidate in &candidates {
            {
                let mut storage = self.storage.lock().unwrap();
                storage.append_event(
                    job.id,
                    "fwc_search_attempt",
                    Some(&serde_json::json!({
                        "employer_id": employer.id,
                        "query": candidate,
                    })),
                )?;
            }

            let page = self.search.search(candidate).await?;
            if !page.results.is_empty() {
                results = page.results;
                winning_query = Some(candidate.clone());
                break;
            }

            tracing::debug!(
                "No results for '{}' (employer {}), trying next candidate",
                candidate,
                employer.id
            );
            last_empty = Some(page);
        }

        if results.is_empty() {
            let mut storage = self.storage.lock().unwrap();
            storage.append_event(
                job.id,
                "fwc_employer_no_results",
                Some(&serde_json::json!({
                    "employer_id": employer.id,
                    "queries_tried": candidates,
                })),
            )?;
            let mut context = ScrapeContext {
                query: candidates.last().cloned(),
                ..Default::default()
            };
            if let Some(page) = &last_empty {
                context.page_url = Some(page.final_url.clone());
                context = context.with_html_sample(&page.html);
            }
            return Err(ScrapeError::new(
                ScrapeStage::Search,
                format!("no results for any of {} queries", candidates.len()),
            )
            .with_context(context)
            .into());
        }

        // First 15 results are enough for the audit trail
        let logged: Vec<&SearchResult> =
            results.iter().take(self.fwc_config.result_limit).collect();

        {
            let mut storage = self.storage.lock().unwrap();
            storage.append_event(
                job.id,
                "fwc_employer_succeeded",
                Some(&serde_json::json!({
                    "employer_id": employer.id,
                    "query": winning_query,
                    "result_count": results.len(),
                    "results": logged,
                })),
            )?;
        }

        if payload.auto_link {
            self.apply_best_result(employer, &results[0])?;
        } else {
            let mut storage = self.storage.lock().unwrap();
            storage.append_event(
                job.id,
                "fwc_candidates_logged",
                Some(&serde_json::json!({
                    "employer_id": employer.id,
                    "candidates": logged,
                    "note": "auto_link disabled; review manually",
                })),
            )?;
        }

        Ok(())
    }

    /// Upserts the best result and flips the employer's EBA flag.
    ///
    /// Both writes must succeed; a persistence failure fails this
    /// employer's attempt.
    fn apply_best_result(&self, employer: &EmployerRecord, best: &SearchResult) -> Result<()> {
        let input = EbaRecordInput {
            title: best.title.clone(),
            agreement_type: best.agreement_type.clone(),
            status: best.status.clone(),
            approved_date: best.approved_date.clone(),
            expiry_date: best.expiry_date.clone(),
            lodgement_number: best.lodgement_number.clone(),
            document_url: best.document_url.clone(),
            summary_url: best.summary_url.clone(),
        };

        let mut storage = self.storage.lock().unwrap();
        let inserted = storage.upsert_eba_record(employer.id, &input)?;
        storage.set_employer_eba_flag(employer.id, true)?;

        tracing::info!(
            "{} EBA record for employer {} ('{}')",
            if inserted { "Inserted" } else { "Updated" },
            employer.id,
            best.title
        );

        Ok(())
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
            "fwc_employer_failed",
            Some(&serde_json::json!({
                "employer_id": employer.id,
                "error": error.to_string(),
                "context": context,
            })),
        )?;
        Ok(())
    }
}
