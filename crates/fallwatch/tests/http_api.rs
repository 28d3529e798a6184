//! HTTP API tests: the router is served on an ephemeral port and driven
//! with `reqwest`.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use fallwatch::config::FailurePolicy;
use fallwatch::model::JobStatus;

use common::{parsed, GatedRunner, TestHarness};

const FALL_MODEL: &str =
    "echo '{\"fall_detected\": true, \"confidence\": 0.93, \"model_version\": \"3.0.0\"}'\n";

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

fn video_form(name: &str, location: Option<&str>) -> Form {
    let part = Part::bytes(b"not really a video".to_vec())
        .file_name(name.to_string())
        .mime_str("video/mp4")
        .unwrap();
    let form = Form::new().part("video", part);
    match location {
        Some(location) => form.text("location", location.to_string()),
        None => form,
    }
}

async fn submit(client: &Client, addr: SocketAddr, user: &str, name: &str) -> reqwest::Response {
    client
        .post(url(addr, "/api/fall-detection/analyze"))
        .header("X-User-Id", user)
        .multipart(video_form(name, Some("Living room")))
        .send()
        .await
        .unwrap()
}

/// Submits a video, waits for it to finish and returns the job id.
async fn completed_job(harness: &TestHarness, client: &Client, addr: SocketAddr, user: &str) -> String {
    let response = submit(client, addr, user, "fall.mp4").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    let id = body["jobId"].as_str().unwrap().to_string();
    let job = harness.wait_terminal(&id, Duration::from_secs(10)).await;
    assert_eq!(job.status, JobStatus::Completed);
    id
}

fn uploads_in(harness: &TestHarness) -> usize {
    std::fs::read_dir(&harness.uploads_dir).unwrap().count()
}

#[tokio::test]
async fn test_health_needs_no_identity() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            true,
        )
        .await;

    let body: Value = reqwest::get(url(addr, "/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    let response = reqwest::get(url(addr, "/api/fall-detection/analysis")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_upload_analyze_and_fetch() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            true,
        )
        .await;
    let client = Client::new();

    let response = submit(&client, addr, "user-a", "../../etc/fall clip.mp4").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "processing");
    let id = body["jobId"].as_str().unwrap().to_string();

    harness.wait_terminal(&id, Duration::from_secs(10)).await;

    let job: Value = client
        .get(url(addr, &format!("/api/fall-detection/analysis/{}", id)))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["id"], id.as_str());
    assert_eq!(job["status"], "completed");
    assert_eq!(job["location"], "Living room");
    assert_eq!(job["result"]["fallDetected"], true);
    assert_eq!(job["result"]["modelVersion"], "3.0.0");
    assert!(job.get("inputRef").is_none());
    assert!(job.get("ownerId").is_none());

    // The stored name is a single sanitized component inside the uploads dir.
    let stored: Vec<_> = std::fs::read_dir(&harness.uploads_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].ends_with("-fall_clip.mp4"));

    let list: Value = client
        .get(url(addr, "/api/fall-detection/analysis?limit=5"))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 1);
    assert_eq!(list["limit"], 5);
    assert_eq!(list["jobs"][0]["id"], id.as_str());

    let alerts: Value = client
        .get(url(addr, "/api/alerts"))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["total"], 1);
    assert_eq!(alerts["alerts"][0]["sourceJobId"], id.as_str());
    assert_eq!(alerts["alerts"][0]["type"], "fall_detected");
    assert_eq!(alerts["alerts"][0]["severity"], "high");
}

#[tokio::test]
async fn test_rejects_non_video_and_missing_field() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            true,
        )
        .await;
    let client = Client::new();

    let part = Part::bytes(b"%PDF-1.7".to_vec())
        .file_name("report.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let response = client
        .post(url(addr, "/api/fall-detection/analyze"))
        .header("X-User-Id", "user-a")
        .multipart(Form::new().part("video", part))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(url(addr, "/api/fall-detection/analyze"))
        .header("X-User-Id", "user-a")
        .multipart(Form::new().text("location", "Kitchen"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(uploads_in(&harness), 0);
    assert_eq!(
        harness
            .jobs
            .list_for_owner("user-a", &Default::default())
            .unwrap()
            .total,
        0
    );
}

#[tokio::test]
async fn test_malformed_query_is_json_bad_request() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            true,
        )
        .await;
    let client = Client::new();

    for path in ["/api/fall-detection/analysis?limit=abc", "/api/alerts?offset=-1"] {
        let response = client
            .get(url(addr, path))
            .header("X-User-Id", "user-a")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", path);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().is_some_and(|m| !m.is_empty()), "{}", path);
    }
}

#[tokio::test]
async fn test_busy_returns_503_with_retry_after() {
    let harness = TestHarness::new();
    let runner = GatedRunner::new(parsed(false, 0.2));
    let service = harness.service(
        runner.clone(),
        TestHarness::settings(FailurePolicy::Fail, Duration::from_secs(5)),
    );
    let addr = harness.spawn_server(service, true).await;
    let client = Client::new();

    let first = submit(&client, addr, "user-a", "walk.mp4").await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first: Value = first.json().await.unwrap();

    let status: Value = client
        .get(url(addr, "/api/fall-detection/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["busy"], true);

    let second = submit(&client, addr, "user-b", "walk.mp4").await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(second.headers().get("retry-after").is_some());
    assert_eq!(uploads_in(&harness), 1);

    runner.release();
    let job = harness
        .wait_terminal(first["jobId"].as_str().unwrap(), Duration::from_secs(10))
        .await;
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_busy_rejects_before_reading_upload() {
    let harness = TestHarness::new();
    let runner = GatedRunner::new(parsed(false, 0.2));
    let service = harness.service(
        runner.clone(),
        TestHarness::settings(FailurePolicy::Fail, Duration::from_secs(5)),
    );
    let addr = harness.spawn_server(service, true).await;
    let client = Client::new();

    let first = submit(&client, addr, "user-a", "walk.mp4").await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first: Value = first.json().await.unwrap();

    // A body that would fail multipart parsing if it were ever read.
    let response = client
        .post(url(addr, "/api/fall-detection/analyze"))
        .header("X-User-Id", "user-b")
        .header("content-type", "multipart/form-data; boundary=fallwatch-boundary")
        .body("not multipart at all")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get("retry-after").is_some());
    assert_eq!(uploads_in(&harness), 1);

    runner.release();
    let job = harness
        .wait_terminal(first["jobId"].as_str().unwrap(), Duration::from_secs(10))
        .await;
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_foreign_job_is_hidden() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            true,
        )
        .await;
    let client = Client::new();
    let id = completed_job(&harness, &client, addr, "user-b").await;

    let response = client
        .get(url(addr, &format!("/api/fall-detection/analysis/{}", id)))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.text().await.unwrap();
    assert!(!body.contains(&id));
    assert!(!body.contains("Living room"));

    let response = client
        .delete(url(addr, &format!("/api/fall-detection/analysis/{}", id)))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(harness.jobs.get(&id).unwrap().is_some());

    let list: Value = client
        .get(url(addr, "/api/fall-detection/analysis"))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_foreign_job_forbidden_when_not_hidden() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            false,
        )
        .await;
    let client = Client::new();
    let id = completed_job(&harness, &client, addr, "user-b").await;

    let response = client
        .get(url(addr, &format!("/api/fall-detection/analysis/{}", id)))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_conflicts_while_processing() {
    let harness = TestHarness::new();
    let runner = GatedRunner::new(parsed(false, 0.2));
    let service = harness.service(
        runner.clone(),
        TestHarness::settings(FailurePolicy::Fail, Duration::from_secs(5)),
    );
    let addr = harness.spawn_server(service, true).await;
    let client = Client::new();

    let body: Value = submit(&client, addr, "user-a", "walk.mp4")
        .await
        .json()
        .await
        .unwrap();
    let id = body["jobId"].as_str().unwrap().to_string();
    let path = format!("/api/fall-detection/analysis/{}", id);

    let response = client
        .delete(url(addr, &path))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    runner.release();
    harness.wait_terminal(&id, Duration::from_secs(10)).await;

    let response = client
        .delete(url(addr, &path))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(uploads_in(&harness), 0);

    let response = client
        .get(url(addr, &path))
        .header("X-User-Id", "user-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_alert_status_updates() {
    let harness = TestHarness::new();
    let script = harness.write_script("model.sh", FALL_MODEL);
    let addr = harness
        .spawn_server(
            harness.script_service(&script, FailurePolicy::Fail, Duration::from_secs(10)),
            true,
        )
        .await;
    let client = Client::new();

    let job_a = completed_job(&harness, &client, addr, "user-a").await;
    let job_b = completed_job(&harness, &client, addr, "user-b").await;
    let alert_a = harness.alerts.find_by_job(&job_a).unwrap().unwrap().id;
    let alert_b = harness.alerts.find_by_job(&job_b).unwrap().unwrap().id;

    let updated: Value = client
        .patch(url(addr, &format!("/api/alerts/{}", alert_a)))
        .header("X-User-Id", "user-a")
        .json(&json!({ "status": "acknowledged" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["status"], "acknowledged");

    let response = client
        .patch(url(addr, &format!("/api/alerts/{}", alert_a)))
        .header("X-User-Id", "user-a")
        .json(&json!({ "status": "snoozed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .patch(url(addr, &format!("/api/alerts/{}", alert_b)))
        .header("X-User-Id", "user-a")
        .json(&json!({ "status": "resolved" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let outcome: Value = client
        .post(url(addr, "/api/alerts/bulk-status"))
        .header("X-User-Id", "user-a")
        .json(&json!({ "alertIds": [alert_a, alert_b, "missing"], "status": "resolved" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["updated"], json!([alert_a]));
    assert_eq!(outcome["skipped"], json!([alert_b, "missing"]));

    let untouched = harness.alerts.get_for_owner("user-b", &alert_b).unwrap();
    assert_eq!(untouched.status.as_str(), "active");
}
