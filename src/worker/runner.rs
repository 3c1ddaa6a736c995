//! The worker loop
//!
//! Repeatedly reserves the next eligible job, decodes its payload,
//! dispatches it to the matching pipeline, and settles the row: success,
//! retry with exponential backoff, or permanent failure. A stale-lock
//! recovery pass runs on its own interval, and an in-flight job is raced
//! against the shutdown grace window.

use crate::config::{Config, RetryConfig, WorkerConfig};
use crate::fwc::FwcLookupPipeline;
use crate::incolink::IncolinkSyncPipeline;
use crate::storage::{JobQueue, StatusFields};
use crate::worker::ShutdownFlag;
use crate::{JobPayload, JobStatus, Result, ScraperJob, SqliteStorage, WorkerError};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Computes the delay before a retry attempt.
///
/// Exponential in the number of attempts already made, clamped to the
/// configured maximum, with uniform jitter applied so simultaneous
/// failures do not retry in lockstep. Never below the poll interval.
pub fn backoff_delay(retry: &RetryConfig, attempts: u32, floor: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    let base = (retry.initial_delay_ms as f64 * retry.multiplier.powi(exponent as i32))
        .min(retry.max_delay_ms as f64);

    // Uniform in [base * (1 - jitter), base * (1 + jitter)]
    let spread = 2.0 * rand::random::<f64>() - 1.0;
    let jittered = (base * (1.0 + retry.jitter * spread)).min(retry.max_delay_ms as f64);

    Duration::from_millis(jittered as u64).max(floor)
}

/// The reservation/dispatch/settlement loop
pub struct WorkerLoop {
    storage: Arc<Mutex<SqliteStorage>>,
    fwc: FwcLookupPipeline,
    incolink: IncolinkSyncPipeline,
    worker: WorkerConfig,
    retry: RetryConfig,
    shutdown: ShutdownFlag,
    /// Drain the queue and exit instead of polling forever
    once: bool,
}

impl WorkerLoop {
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        fwc: FwcLookupPipeline,
        incolink: IncolinkSyncPipeline,
        config: &Config,
        shutdown: ShutdownFlag,
        once: bool,
    ) -> Self {
        Self {
            storage,
            fwc,
            incolink,
            worker: config.worker.clone(),
            retry: config.retry.clone(),
            shutdown,
            once,
        }
    }

    /// Runs until shutdown, or until the queue drains in `--once` mode
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            "Worker loop started (poll interval {:?}, batch {})",
            self.worker.poll_interval(),
            self.worker.reserve_batch_size
        );

        let mut last_cleanup: Option<Instant> = None;

        loop {
            if self.shutdown.is_set() {
                tracing::info!("Shutdown requested, stopping worker loop");
                break;
            }

            if last_cleanup.map_or(true, |t| t.elapsed() >= self.worker.cleanup_interval()) {
                let recovered = {
                    let mut storage = self.storage.lock().unwrap();
                    storage.cleanup_stale_locks(self.worker.lock_timeout())?
                };
                if recovered > 0 {
                    tracing::warn!("Recovered {} job(s) with stale locks", recovered);
                }
                last_cleanup = Some(Instant::now());
            }

            let job = {
                let mut storage = self.storage.lock().unwrap();
                storage.reserve(self.worker.reserve_batch_size)?
            };

            match job {
                Some(job) => {
                    let interrupted = self.execute(&job).await?;
                    if interrupted {
                        break;
                    }
                }
                None => {
                    if self.once {
                        tracing::info!("Queue drained, exiting");
                        break;
                    }
                    tokio::time::sleep(self.worker.poll_interval()).await;
                }
            }
        }

        Ok(())
    }

    /// Runs one claimed job to settlement.
    ///
    /// Returns true when the job was cut short by the shutdown grace
    /// window and force-requeued.
    async fn execute(&self, job: &ScraperJob) -> Result<bool> {
        tracing::info!(
            "Executing job {} ({}) attempt {}/{}",
            job.id,
            job.job_type.to_db_string(),
            job.attempts,
            job.max_attempts
        );

        let mut interrupted = false;
        let settled = match JobPayload::decode(job.job_type, &job.payload) {
            Ok(payload) => {
                let grace = self.worker.graceful_shutdown_timeout();
                let outcome = tokio::select! {
                    result = self.dispatch(job, &payload) => Some(result),
                    _ = self.shutdown.wait_past_grace(grace) => None,
                };

                match outcome {
                    Some(Ok(summary)) => self.complete(job, summary),
                    Some(Err(e)) => self.settle_failure(job, &e),
                    None => {
                        tracing::warn!(
                            "Job {} outlived the shutdown grace window, requeueing",
                            job.id
                        );
                        interrupted = true;
                        let mut storage = self.storage.lock().unwrap();
                        storage
                            .force_requeue(job.id, "interrupted by worker shutdown")
                            .map_err(WorkerError::from)
                    }
                }
            }
            // A payload that cannot decode will never succeed; no retry
            Err(e) => self.fail_without_retry(job, &e),
        };

        // Unconditional, even when settling the row itself failed: a live
        // worker never leaves its own lock behind
        let released = {
            let mut storage = self.storage.lock().unwrap();
            storage.release_job_lock(job.id)
        };
        if let Err(e) = released {
            tracing::error!("Failed to release lock for job {}: {}", job.id, e);
        }

        settled?;
        Ok(interrupted)
    }

    async fn dispatch(&self, job: &ScraperJob, payload: &JobPayload) -> Result<serde_json::Value> {
        match payload {
            JobPayload::FwcLookup(p) => {
                let outcome = self.fwc.run(job, p).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            JobPayload::IncolinkSync(p) => {
                let outcome = self.incolink.run(job, p).await?;
                Ok(serde_json::to_value(outcome)?)
            }
        }
    }

    fn complete(&self, job: &ScraperJob, summary: serde_json::Value) -> Result<()> {
        let mut storage = self.storage.lock().unwrap();
        storage.append_event(job.id, "job_completed", Some(&summary))?;
        storage.mark_job_status(
            job.id,
            JobStatus::Succeeded,
            StatusFields {
                last_error: Some(None),
                clear_lock: true,
                ..Default::default()
            },
        )?;
        tracing::info!("Job {} succeeded", job.id);
        Ok(())
    }

    /// Requeues with backoff while attempts remain, otherwise fails the
    /// job permanently
    fn settle_failure(&self, job: &ScraperJob, error: &WorkerError) -> Result<()> {
        let mut storage = self.storage.lock().unwrap();
        storage.append_event(
            job.id,
            "job_failed",
            Some(&serde_json::json!({
                "error": error.to_string(),
                "attempt": job.attempts,
            })),
        )?;

        if job.attempts < job.max_attempts {
            let delay = backoff_delay(&self.retry, job.attempts, self.worker.poll_interval());
            let run_at = (Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()))
            .to_rfc3339();

            storage.mark_job_status(
                job.id,
                JobStatus::Queued,
                StatusFields {
                    last_error: Some(Some(error.to_string())),
                    clear_lock: true,
                    reset_progress: true,
                    run_at: Some(run_at.clone()),
                },
            )?;
            storage.append_event(
                job.id,
                "job_requeued",
                Some(&serde_json::json!({
                    "run_at": run_at,
                    "delay_ms": delay.as_millis() as u64,
                })),
            )?;
            tracing::warn!(
                "Job {} failed on attempt {}/{}, retrying in {:?}: {}",
                job.id,
                job.attempts,
                job.max_attempts,
                delay,
                error
            );
        } else {
            storage.mark_job_status(
                job.id,
                JobStatus::Failed,
                StatusFields {
                    last_error: Some(Some(error.to_string())),
                    clear_lock: true,
                    ..Default::default()
                },
            )?;
            tracing::error!(
                "Job {} failed permanently after {} attempts: {}",
                job.id,
                job.attempts,
                error
            );
        }

        Ok(())
    }

    fn fail_without_retry(&self, job: &ScraperJob, error: &WorkerError) -> Result<()> {
        tracing::error!("Job {} skipped: {}", job.id, error);
        let mut storage = self.storage.lock().unwrap();
        storage.append_event(
            job.id,
            "job_skipped",
            Some(&serde_json::json!({ "error": error.to_string() })),
        )?;
        storage.mark_job_status(
            job.id,
            JobStatus::Failed,
            StatusFields {
                last_error: Some(Some(error.to_string())),
                clear_lock: true,
                ..Default::default()
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::frames::testing::{FakeFrame, FakePage};
    use crate::browser::{Browser, BrowserError, Page};
    use crate::config::{
        BrowserConfig, FwcConfig, IncolinkConfig, StorageConfig, WorkerConfig,
    };
    use crate::storage::{DomainStore, JobType};
    use async_trait::async_trait;
    use serde_json::json;

    struct FakeBrowser;

    #[async_trait]
    impl Browser for FakeBrowser {
        async fn new_page(&self) -> std::result::Result<Box<dyn Page>, BrowserError> {
            Ok(Box::new(FakePage::new(vec![FakeFrame::default()])))
        }

        async fn close(&self) -> std::result::Result<(), BrowserError> {
            Ok(())
        }
    }

    fn test_config(search_base_url: &str) -> Config {
        Config {
            worker: WorkerConfig {
                poll_interval_ms: 100,
                reserve_batch_size: 5,
                lock_timeout_ms: 60_000,
                cleanup_interval_ms: 60_000,
                graceful_shutdown_timeout_ms: 60_000,
                employer_delay_ms: 0,
            },
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 60_000,
                max_delay_ms: 300_000,
                multiplier: 2.0,
                jitter: 0.0,
            },
            fwc: FwcConfig {
                search_base_url: search_base_url.to_string(),
                query_prefix: "enterprise agreement".to_string(),
                page_size: 20,
                result_limit: 15,
                request_timeout_ms: 5000,
            },
            incolink: IncolinkConfig {
                portal_url: "https://portal.example.com/login".to_string(),
                email: "organiser@example.com".to_string(),
                password: "secret".to_string(),
            },
            browser: BrowserConfig {
                headless: true,
                navigation_timeout_ms: 1000,
                dom_wait_timeout_ms: 100,
            },
            storage: StorageConfig {
                database_path: ":memory:".to_string(),
            },
        }
    }

    fn worker_loop(config: &Config) -> (Arc<Mutex<SqliteStorage>>, WorkerLoop, ShutdownFlag) {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let fwc =
            FwcLookupPipeline::new(storage.clone(), config.fwc.clone(), &config.worker).unwrap();
        let incolink = IncolinkSyncPipeline::new(
            storage.clone(),
            Arc::new(FakeBrowser),
            config.incolink.clone(),
            config.browser.clone(),
            &config.worker,
        );
        let shutdown = ShutdownFlag::new();
        let worker = WorkerLoop::new(
            storage.clone(),
            fwc,
            incolink,
            config,
            shutdown.clone(),
            true,
        );
        (storage, worker, shutdown)
    }

    #[test]
    fn test_backoff_without_jitter_is_exponential() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.0,
        };
        let floor = Duration::from_millis(100);

        assert_eq!(backoff_delay(&retry, 1, floor), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&retry, 2, floor), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&retry, 3, floor), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_clamps_to_max() {
        let retry = RetryConfig {
            max_attempts: 20,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.0,
        };
        let delay = backoff_delay(&retry, 15, Duration::from_millis(100));
        assert_eq!(delay, Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.5,
        };
        for _ in 0..50 {
            let delay = backoff_delay(&retry, 1, Duration::from_millis(1));
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_backoff_floors_at_poll_interval() {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.0,
        };
        let delay = backoff_delay(&retry, 1, Duration::from_millis(500));
        assert_eq!(delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_once_mode_exits_on_empty_queue() {
        let config = test_config("https://example.com/document-search");
        let (_storage, worker, _shutdown) = worker_loop(&config);
        worker.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_loop_before_work() {
        let config = test_config("https://example.com/document-search");
        let (storage, worker, shutdown) = worker_loop(&config);
        {
            let mut s = storage.lock().unwrap();
            s.enqueue(JobType::FwcLookup, &json!({"employer_ids": [1]}), 0, 3)
                .unwrap();
        }

        shutdown.trigger();
        worker.run().await.unwrap();

        let s = storage.lock().unwrap();
        let stats = s.queue_stats().unwrap();
        assert_eq!(stats.queued, 1, "job should be untouched");
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_without_retry() {
        let config = test_config("https://example.com/document-search");
        let (storage, worker, _shutdown) = worker_loop(&config);
        let job_id = {
            let mut s = storage.lock().unwrap();
            // Empty employer list never decodes
            s.enqueue(JobType::FwcLookup, &json!({"employer_ids": []}), 0, 3)
                .unwrap()
        };

        worker.run().await.unwrap();

        let s = storage.lock().unwrap();
        let job = s.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1, "no retries for undecodable payloads");
        assert!(job.lock_token.is_none());
        assert_eq!(s.count_events(job_id, "job_skipped").unwrap(), 1);
        assert_eq!(s.count_events(job_id, "job_requeued").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_requeued_with_backoff() {
        let config = test_config("https://example.com/document-search");
        let (storage, worker, _shutdown) = worker_loop(&config);
        let job_id = {
            let mut s = storage.lock().unwrap();
            // Employer 999 does not exist, so the pipeline fails as a whole
            s.enqueue(JobType::FwcLookup, &json!({"employer_ids": [999]}), 0, 3)
                .unwrap()
        };

        worker.run().await.unwrap();

        let s = storage.lock().unwrap();
        let job = s.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert!(job.lock_token.is_none());
        assert!(job.run_at > Utc::now().to_rfc3339(), "run_at should be in the future");
        assert!(job.last_error.unwrap().contains("Employer not found"));

        // Settlement leaves a strictly ordered audit trail
        let events: Vec<String> = s
            .list_events(job_id)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(events, vec!["job_locked", "job_failed", "job_requeued"]);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_permanently() {
        let config = test_config("https://example.com/document-search");
        let (storage, worker, _shutdown) = worker_loop(&config);
        let job_id = {
            let mut s = storage.lock().unwrap();
            s.enqueue(JobType::FwcLookup, &json!({"employer_ids": [999]}), 0, 1)
                .unwrap()
        };

        worker.run().await.unwrap();

        let s = storage.lock().unwrap();
        let job = s.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());
        assert_eq!(s.count_events(job_id, "job_requeued").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lock_released_when_settlement_write_fails() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>var documentSearchViewModel = {"results":
                   [{"documentTitle": "ABC Agreement 2024"}]};</script>"#,
            ))
            .mount(&server)
            .await;

        let config = test_config(&format!("{}/document-search", server.uri()));
        let (storage, worker, _shutdown) = worker_loop(&config);
        let job_id = {
            let mut s = storage.lock().unwrap();
            let employer_id = s.create_employer("ABC Construction", None).unwrap();
            let job_id = s
                .enqueue(
                    JobType::FwcLookup,
                    &json!({"employer_ids": [employer_id]}),
                    0,
                    3,
                )
                .unwrap();
            // The completion event insert is rejected, so settling the row
            // fails after the pipeline has already succeeded
            s.execute_sql(
                "CREATE TRIGGER reject_completion BEFORE INSERT ON scraper_job_events
                 WHEN NEW.event_type = 'job_completed'
                 BEGIN SELECT RAISE(ABORT, 'events table rejected the write'); END",
            )
            .unwrap();
            job_id
        };

        assert!(worker.run().await.is_err(), "settlement failure surfaces");

        let s = storage.lock().unwrap();
        let job = s.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Running, "status write never ran");
        assert!(job.lock_token.is_none(), "lock must not outlive the attempt");
        assert!(job.locked_at.is_none());
    }

    #[tokio::test]
    async fn test_inflight_job_requeued_when_grace_expires() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>still searching</body></html>")
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&format!("{}/document-search", server.uri()));
        config.worker.graceful_shutdown_timeout_ms = 50;
        let (storage, worker, shutdown) = worker_loop(&config);
        let job_id = {
            let mut s = storage.lock().unwrap();
            let employer_id = s.create_employer("ABC Construction", None).unwrap();
            s.enqueue(
                JobType::FwcLookup,
                &json!({"employer_ids": [employer_id]}),
                0,
                3,
            )
            .unwrap()
        };

        // Shutdown arrives while the search response is still pending
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.trigger();
        });

        worker.run().await.unwrap();

        let s = storage.lock().unwrap();
        let job = s.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.lock_token.is_none());
        assert_eq!(job.attempts, 1);
        assert_eq!(
            job.last_error.as_deref(),
            Some("interrupted by worker shutdown")
        );
    }

    #[tokio::test]
    async fn test_successful_job_records_outcome() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>var documentSearchViewModel = {"results":
                   [{"documentTitle": "ABC Agreement 2024"}]};</script>"#,
            ))
            .mount(&server)
            .await;

        let config = test_config(&format!("{}/document-search", server.uri()));
        let (storage, worker, _shutdown) = worker_loop(&config);
        let (job_id, _employer_id) = {
            let mut s = storage.lock().unwrap();
            let employer_id = s.create_employer("ABC Construction", None).unwrap();
            let job_id = s
                .enqueue(
                    JobType::FwcLookup,
                    &json!({"employer_ids": [employer_id]}),
                    0,
                    3,
                )
                .unwrap();
            (job_id, employer_id)
        };

        worker.run().await.unwrap();

        let s = storage.lock().unwrap();
        let job = s.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.lock_token.is_none());
        assert!(job.last_error.is_none());
        assert_eq!(s.count_events(job_id, "job_completed").unwrap(), 1);
    }
}
