use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use seedbox::api::models::{
    CleanupResponse, DeleteResponse, JobAcceptedResponse, JobFilesResponse, JobListResponse,
    JobSnapshot,
};
use seedbox::api::{AppState, router};
use seedbox::config::{ByteSize, Config};
use seedbox::engine::{SimulatedEngine, SimulationProfile};
use seedbox::jobs::JobStatus;
use seedbox::ledger::FjallStore;
use seedbox::observability::Metrics;
use seedbox::service::JobService;

const LOCATOR: &str = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=Example%20File&tr=udp%3A%2F%2Ftracker.example%3A1337";

fn fast_profile() -> SimulationProfile {
    SimulationProfile {
        metadata_delay_polls: 2,
        total_size: ByteSize(12 * 1024),
        file_count: 3,
        bytes_per_poll: ByteSize(4 * 1024),
        ..SimulationProfile::default()
    }
}

/// Metadata never arrives, so jobs stay `downloading`
fn stalled_profile() -> SimulationProfile {
    SimulationProfile {
        metadata_delay_polls: u32::MAX,
        ..fast_profile()
    }
}

/// Builds a test app with isolated ledger and download directory
fn build_test_app(profile: SimulationProfile) -> (Router, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let mut config = Config::default();
    config.server.fjall_path = temp_dir.path().join("ledger");
    config.server.api.max_payload_bytes = ByteSize(4 * 1024);
    config.server.api.max_locator_bytes = 2 * 1024;
    config.downloads.download_dir = temp_dir.path().join("downloads");
    config.downloads.metadata_poll_interval_ms = 5;
    config.downloads.download_poll_interval_ms = 5;
    config.downloads.delete_grace_secs = 2;
    std::fs::create_dir_all(&config.downloads.download_dir).unwrap();

    let store = FjallStore::open(&config.server.fjall_path).expect("Failed to open test store");
    let service = JobService::build(
        store,
        Arc::new(SimulatedEngine::new(profile)),
        Arc::new(Metrics::new()),
        config.orchestrator_config(),
        &config.downloads.archive_suffix,
        config.service_settings(),
    );

    (router(AppState::new(config, service)), temp_dir)
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&payload).unwrap()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::body::Bytes) {
    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), request)
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

async fn submit(app: &Router, locator: &str) -> JobAcceptedResponse {
    let (status, body) = send(app, post_json("/jobs", json!({ "locator": locator }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    serde_json::from_slice(&body).unwrap()
}

async fn wait_for_status(app: &Router, job_id: &str, wanted: JobStatus) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let (status, body) = send(app, get(&format!("/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: JobSnapshot = serde_json::from_slice(&body).unwrap();
        if snapshot.status == wanted {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {:?}, wanted {wanted:?}",
            snapshot.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn error_code(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).unwrap();
    value["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_submit_job_success() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let accepted = submit(&app, LOCATOR).await;

    assert!(!accepted.job_id.is_empty());
    assert_eq!(accepted.name, "Example File");
    assert!(accepted.created);
}

#[tokio::test]
async fn test_submit_job_idempotency() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let request = || {
        Request::builder()
            .uri("/jobs")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Seedbox-Idempotency-Key", "test-key-123")
            .body(Body::from(json!({ "locator": LOCATOR }).to_string()))
            .unwrap()
    };

    let (status1, body1) = send(&app, request()).await;
    let (status2, body2) = send(&app, request()).await;
    assert_eq!(status1, StatusCode::ACCEPTED);
    assert_eq!(status2, StatusCode::ACCEPTED);

    let job1: JobAcceptedResponse = serde_json::from_slice(&body1).unwrap();
    let job2: JobAcceptedResponse = serde_json::from_slice(&body2).unwrap();
    assert_eq!(job1.job_id, job2.job_id);
    assert!(job1.created);
    assert!(!job2.created);

    let (_, body) = send(&app, get("/jobs")).await;
    let list: JobListResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(list.counts.total, 1);
}

#[tokio::test]
async fn test_submit_job_invalid_content_type() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let request = Request::builder()
        .uri("/jobs")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(json!({ "locator": LOCATOR }).to_string()))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_submit_job_malformed_json() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let (status, body) = send(&app, post_json("/jobs", json!({ "url": LOCATOR }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_submit_job_invalid_locator() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    for locator in ["", "   ", "https://example.com/file.torrent"] {
        let (status, body) = send(&app, post_json("/jobs", json!({ "locator": locator }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "locator {locator:?}");
        assert_eq!(error_code(&body), "INVALID_LOCATOR");
    }

    let long = format!("magnet:?dn={}", "a".repeat(3000));
    let (status, body) = send(&app, post_json("/jobs", json!({ "locator": long }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body), "INVALID_LOCATOR");
}

#[tokio::test]
async fn test_submit_job_payload_too_large() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let huge = format!("magnet:?dn={}", "a".repeat(8 * 1024));
    let (status, body) = send(&app, post_json("/jobs", json!({ "locator": huge }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_get_unknown_job() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let (status, body) = send(&app, get("/jobs/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn test_multi_file_download_and_artifact() {
    let (app, temp_dir) = build_test_app(fast_profile());

    let accepted = submit(&app, LOCATOR).await;
    let snapshot = wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;

    assert_eq!(snapshot.progress, 100.0);
    assert_eq!(snapshot.eta, "0s");
    assert_eq!(snapshot.size, "12.0 KB");
    assert_eq!(snapshot.download_speed, "0 B/s");
    assert!(snapshot.is_multi_file);
    assert!(snapshot.completed_at.is_some());

    let response = ServiceExt::<Request<Body>>::oneshot(
        app.clone(),
        get(&format!("/jobs/{}/artifact", accepted.job_id)),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("filename=\"Example File.zip\""));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let archive = zip::ZipArchive::new(std::io::Cursor::new(body.to_vec())).unwrap();
    assert_eq!(archive.len(), 3);

    assert!(temp_dir.path().join("downloads/Example File.zip").exists());
    assert!(temp_dir.path().join("downloads/Example File/extras/part-001.bin").exists());
}

#[tokio::test]
async fn test_single_file_artifact() {
    let profile = SimulationProfile {
        file_count: 1,
        ..fast_profile()
    };
    let (app, _temp_dir) = build_test_app(profile);

    let accepted = submit(&app, "magnet:?xt=urn:btih:abc&dn=disk.iso").await;
    let snapshot = wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;
    assert!(!snapshot.is_multi_file);

    let response = ServiceExt::<Request<Body>>::oneshot(
        app.clone(),
        get(&format!("/jobs/{}/artifact", accepted.job_id)),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "12288");
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.len(), 12 * 1024);
}

#[tokio::test]
async fn test_artifact_not_ready() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let accepted = submit(&app, LOCATOR).await;
    let (status, body) = send(&app, get(&format!("/jobs/{}/artifact", accepted.job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "NOT_READY");
}

#[tokio::test]
async fn test_list_files_of_multi_file_job() {
    let (app, _temp_dir) = build_test_app(fast_profile());

    let accepted = submit(&app, LOCATOR).await;
    wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;

    let (status, body) = send(&app, get(&format!("/jobs/{}/files", accepted.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let listing: JobFilesResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(listing.job_id, accepted.job_id);

    let mut files = listing.files;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let paths: Vec<&str> = files.iter().map(|file| file.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["extras/part-001.bin", "part-000.bin", "part-002.bin"]
    );
    assert_eq!(files[0].name, "part-001.bin");
    assert!(files.iter().all(|file| file.size_bytes == 4096));
    assert!(files.iter().all(|file| file.size == "4.0 KB"));
}

#[tokio::test]
async fn test_list_files_of_single_file_job() {
    let profile = SimulationProfile {
        file_count: 1,
        ..fast_profile()
    };
    let (app, _temp_dir) = build_test_app(profile);

    let accepted = submit(&app, "magnet:?xt=urn:btih:abc&dn=disk.iso").await;
    wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;

    let (status, body) = send(&app, get(&format!("/jobs/{}/files", accepted.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let listing: JobFilesResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].path, "disk.iso");
    assert_eq!(listing.files[0].size, "12.0 KB");
}

#[tokio::test]
async fn test_list_files_not_ready_and_unknown() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let accepted = submit(&app, LOCATOR).await;
    let (status, body) = send(&app, get(&format!("/jobs/{}/files", accepted.job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "NOT_READY");

    let (status, body) = send(&app, get("/jobs/does-not-exist/files")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let (app, _temp_dir) = build_test_app(fast_profile());

    let accepted = submit(&app, LOCATOR).await;
    wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;

    for action in ["pause", "resume", "restart"] {
        let (status, body) =
            send(&app, post_empty(&format!("/jobs/{}/{action}", accepted.job_id))).await;
        assert_eq!(status, StatusCode::CONFLICT, "{action}");
        assert_eq!(error_code(&body), "INVALID_TRANSITION");
    }

    let snapshot = wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;
    assert_eq!(snapshot.progress, 100.0);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let accepted = submit(&app, LOCATOR).await;

    let (status, body) = send(&app, post_empty(&format!("/jobs/{}/pause", accepted.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let paused: JobSnapshot = serde_json::from_slice(&body).unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.status_display, "Paused");

    let (status, body) =
        send(&app, post_empty(&format!("/jobs/{}/resume", accepted.job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let resumed: JobSnapshot = serde_json::from_slice(&body).unwrap();
    assert_eq!(resumed.status, JobStatus::Pending);

    wait_for_status(&app, &accepted.job_id, JobStatus::Downloading).await;
}

#[tokio::test]
async fn test_list_jobs_with_filter() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let first = submit(&app, "magnet:?dn=first").await;
    let second = submit(&app, "magnet:?dn=second").await;
    send(&app, post_empty(&format!("/jobs/{}/pause", first.job_id))).await;

    let (status, body) = send(&app, get("/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let list: JobListResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(list.jobs.len(), 2);
    assert_eq!(list.jobs[0].job_id, second.job_id);
    assert_eq!(list.counts.paused, 1);

    let (_, body) = send(&app, get("/jobs?status=paused")).await;
    let list: JobListResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(list.jobs.len(), 1);
    assert_eq!(list.jobs[0].job_id, first.job_id);

    let (status, body) = send(&app, get("/jobs?status=sleeping")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_delete_job() {
    let (app, temp_dir) = build_test_app(fast_profile());

    let accepted = submit(&app, LOCATOR).await;
    wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;
    assert!(temp_dir.path().join("downloads/Example File").exists());

    let request = Request::builder()
        .uri(format!("/jobs/{}", accepted.job_id))
        .method("DELETE")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let deleted: DeleteResponse = serde_json::from_slice(&body).unwrap();
    assert!(deleted.deleted);
    assert!(deleted.artifacts_removed >= 1);

    assert!(!temp_dir.path().join("downloads/Example File").exists());
    assert!(!temp_dir.path().join("downloads/Example File.zip").exists());

    let (status, _) = send(&app, get(&format!("/jobs/{}", accepted.job_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cleanup_completed() {
    let (app, temp_dir) = build_test_app(fast_profile());

    let accepted = submit(&app, LOCATOR).await;
    wait_for_status(&app, &accepted.job_id, JobStatus::Completed).await;

    let (status, body) = send(&app, post_empty("/operators/cleanup/completed")).await;
    assert_eq!(status, StatusCode::OK);
    let cleanup: CleanupResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(cleanup.removed, 1);
    assert!(!temp_dir.path().join("downloads/Example File").exists());

    let (status, body) = send(&app, post_empty("/operators/cleanup/pending")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (app, _temp_dir) = build_test_app(stalled_profile());

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["fjall"], "healthy");

    let (status, _) = send(&app, get("/operators/health")).await;
    assert_eq!(status, StatusCode::OK);

    submit(&app, LOCATOR).await;
    let (status, body) = send(&app, get("/operators/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let metrics: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics["counters"]["jobs_submitted"], 1);
    assert_eq!(metrics["jobs"]["total"], 1);
}
