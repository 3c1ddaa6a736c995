//! End-to-end FWC lookup pipeline tests against a mock search endpoint

use organiser_worker::config::{FwcConfig, WorkerConfig};
use organiser_worker::fwc::FwcLookupPipeline;
use organiser_worker::storage::{DomainStore, FwcLookupPayload, JobQueue, SqliteStorage};
use organiser_worker::{JobType, ScraperJob};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESULT_PAGE: &str = r#"<html><body>
    <script>
        var documentSearchViewModel = {"results": [
            {"documentTitle": "ABC Enterprise Agreement 2024",
             "status": "Approved",
             "approvedDate": "05/03/2024",
             "nominalExpiryDate": "30/06/2027",
             "publicationId": "AE524123",
             "documentUrl": "https://example.com/doc/1"}
        ]};
    </script>
    </body></html>"#;

const EMPTY_PAGE: &str = "<html><body><div>No documents found</div></body></html>";

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 100,
        reserve_batch_size: 5,
        lock_timeout_ms: 60_000,
        cleanup_interval_ms: 60_000,
        graceful_shutdown_timeout_ms: 60_000,
        employer_delay_ms: 0,
    }
}

fn fwc_config(server: &MockServer) -> FwcConfig {
    FwcConfig {
        search_base_url: format!("{}/document-search", server.uri()),
        query_prefix: "enterprise agreement".to_string(),
        page_size: 20,
        result_limit: 15,
        request_timeout_ms: 5000,
    }
}

struct Fixture {
    storage: Arc<Mutex<SqliteStorage>>,
    pipeline: FwcLookupPipeline,
    job: ScraperJob,
    abc_id: i64,
    zzyzx_id: i64,
}

async fn fixture(server: &MockServer) -> Fixture {
    let mut raw = SqliteStorage::new_in_memory().unwrap();
    let abc_id = raw.create_employer("ABC Pty Ltd", None).unwrap();
    let zzyzx_id = raw.create_employer("Zzyzx Widgets Pty Ltd", None).unwrap();

    let job_id = raw
        .enqueue(
            JobType::FwcLookup,
            &json!({"employer_ids": [abc_id, zzyzx_id], "auto_link": true}),
            0,
            3,
        )
        .unwrap();
    let job = raw.get_job(job_id).unwrap();

    let storage = Arc::new(Mutex::new(raw));
    let pipeline =
        FwcLookupPipeline::new(storage.clone(), fwc_config(server), &worker_config()).unwrap();

    Fixture {
        storage,
        pipeline,
        job,
        abc_id,
        zzyzx_id,
    }
}

#[tokio::test]
async fn mixed_outcome_links_one_employer_and_logs_the_other() {
    let server = MockServer::start().await;

    // The first candidate for "ABC Pty Ltd" is the simplified prefixed form
    Mock::given(method("GET"))
        .and(query_param("q", "enterprise agreement ABC"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .mount(&server)
        .await;

    let f = fixture(&server).await;
    let payload = FwcLookupPayload {
        employer_ids: vec![f.abc_id, f.zzyzx_id],
        auto_link: true,
        search_overrides: HashMap::new(),
    };

    let outcome = f.pipeline.run(&f.job, &payload).await.unwrap();
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.failed, 1);

    let storage = f.storage.lock().unwrap();

    // ABC got an EBA record and the flag flipped
    let record = storage.get_eba_record(f.abc_id).unwrap().unwrap();
    assert_eq!(record.title, "ABC Enterprise Agreement 2024");
    assert_eq!(record.lodgement_number.as_deref(), Some("AE524123"));
    assert_eq!(
        record.comments.as_deref(),
        Some("Linked from FWC document search")
    );
    let employers = storage.get_employers(&[f.abc_id, f.zzyzx_id]).unwrap();
    assert!(employers[0].enterprise_agreement_status);
    assert!(!employers[1].enterprise_agreement_status);

    // Zzyzx exhausted its query ladder
    assert_eq!(storage.get_eba_record(f.zzyzx_id).unwrap().map(|r| r.id), None);
    assert_eq!(
        storage
            .count_events(f.job.id, "fwc_employer_no_results")
            .unwrap(),
        1
    );

    // The failure event carries the stage and a sample of the last page
    let events = storage.list_events(f.job.id).unwrap();
    let failed: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == "fwc_employer_failed")
        .collect();
    assert_eq!(failed.len(), 1);
    let payload: serde_json::Value =
        serde_json::from_str(failed[0].payload.as_deref().unwrap()).unwrap();
    assert_eq!(payload["employer_id"], f.zzyzx_id);
    assert_eq!(payload["context"]["stage"], "search");
    assert!(payload["context"]["html_sample"]
        .as_str()
        .unwrap()
        .contains("No documents found"));
    assert_eq!(
        storage
            .count_events(f.job.id, "fwc_employer_succeeded")
            .unwrap(),
        1
    );

    // Progress reached the total
    let job = storage.get_job(f.job.id).unwrap();
    assert_eq!(job.progress_completed, 2);
    assert_eq!(job.progress_total, 2);
}

#[tokio::test]
async fn auto_link_disabled_logs_candidates_without_writing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_PAGE))
        .mount(&server)
        .await;

    let f = fixture(&server).await;
    let payload = FwcLookupPayload {
        employer_ids: vec![f.abc_id],
        auto_link: false,
        search_overrides: HashMap::new(),
    };

    let outcome = f.pipeline.run(&f.job, &payload).await.unwrap();
    assert_eq!(outcome.succeeded, 1);

    let storage = f.storage.lock().unwrap();
    assert!(storage.get_eba_record(f.abc_id).unwrap().is_none());
    let employers = storage.get_employers(&[f.abc_id]).unwrap();
    assert!(!employers[0].enterprise_agreement_status);
    assert_eq!(
        storage
            .count_events(f.job.id, "fwc_candidates_logged")
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn search_override_is_tried_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("q", "ABC Constructions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .mount(&server)
        .await;

    let f = fixture(&server).await;
    let payload = FwcLookupPayload {
        employer_ids: vec![f.abc_id],
        auto_link: true,
        search_overrides: HashMap::from([(f.abc_id, "ABC Constructions".to_string())]),
    };

    let outcome = f.pipeline.run(&f.job, &payload).await.unwrap();
    assert_eq!(outcome.succeeded, 1);

    let storage = f.storage.lock().unwrap();
    // The override hit on the first attempt; only one search event
    assert_eq!(
        storage
            .count_events(f.job.id, "fwc_search_attempt")
            .unwrap(),
        1
    );
}
