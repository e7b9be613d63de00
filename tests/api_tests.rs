mod common;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use common::{bundle_archive, TestAgent, TEST_CSR};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_create_instance_with_missing_params_creates_no_job() {
    let agent = TestAgent::new();

    let response = agent
        .put_json("/instances/foo0/", json!({ "bundle_name": "app" }))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.message().contains("bundle_version"));
    assert!(agent.state.jobs.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_create_instance_with_unknown_bundle_is_rejected() {
    let agent = TestAgent::new();

    let response = agent
        .put_json(
            "/instances/foo0/",
            json!({ "bundle_name": "app", "bundle_version": "1.0" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.message(), "Bundle 'app@1.0' does not exist");
    assert!(agent.state.jobs.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_create_and_upgrade_instance() {
    let agent = TestAgent::new();
    agent.install_bundle("app", "1.0");
    agent.install_bundle("app", "1.1");

    let response = agent
        .put_json(
            "/instances/foo0/",
            json!({ "bundle_name": "app", "bundle_version": "1.0" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.json["resource_type"], "Instance");
    assert_eq!(response.json["intent"], "CREATE");

    let job = agent.wait_job(&response.job_id()).await;
    assert_eq!(job["status"], "ready", "{}", job);

    let current = agent.data_root().join("applications/foo0/current");
    assert_eq!(std::fs::read_to_string(current.join("VERSION")).unwrap(), "1.0");

    let response = agent
        .request(
            Method::POST,
            "/instances/foo0/upgrade/",
            json!({ "bundle_version": "1.1" }).to_string(),
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    let job = agent.wait_job(&response.job_id()).await;
    assert_eq!(job["status"], "ready", "{}", job);
    assert_eq!(std::fs::read_to_string(current.join("VERSION")).unwrap(), "1.1");

    let instance = agent.get("/instances/foo0/").await;
    assert_eq!(instance.status, StatusCode::OK);
    assert_eq!(instance.json["bundle_version"], "1.1");

    let listed = agent.get("/instances/").await;
    assert_eq!(listed.json.as_array().map(Vec::len), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upgrade_sent_right_after_create_is_queued() {
    let agent = TestAgent::new();
    agent.install_bundle("app", "1.0");
    agent.install_bundle("app", "1.1");

    for i in 0..10 {
        let uri = format!("/instances/foo{}/", i);
        let create = agent
            .put_json(&uri, json!({ "bundle_name": "app", "bundle_version": "1.0" }))
            .await;
        let upgrade = agent
            .request(
                Method::POST,
                &format!("{}upgrade/", uri),
                json!({ "bundle_version": "1.1" }).to_string(),
            )
            .await;
        assert_eq!(create.status, StatusCode::ACCEPTED, "{:?}", create.json);
        assert_eq!(upgrade.status, StatusCode::ACCEPTED, "{:?}", upgrade.json);

        let created = agent.wait_job(&create.job_id()).await;
        let upgraded = agent.wait_job(&upgrade.job_id()).await;
        assert_eq!(created["status"], "ready", "{}", created);
        assert_eq!(upgraded["status"], "ready", "{}", upgraded);

        let current = agent.data_root().join(format!("applications/foo{}/current", i));
        assert_eq!(std::fs::read_to_string(current.join("VERSION")).unwrap(), "1.1");
    }
}

#[tokio::test]
async fn test_upgrade_of_missing_instance_fails_in_job() {
    let agent = TestAgent::new();

    let upgrade = agent
        .request(
            Method::POST,
            "/instances/nope/upgrade/",
            json!({ "bundle_version": "1.1" }).to_string(),
        )
        .await;
    assert_eq!(upgrade.status, StatusCode::ACCEPTED);

    let job = agent.wait_job(&upgrade.job_id()).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["result"]["data"]["code"], 404);
    assert_eq!(job["result"]["data"]["message"], "Instance 'nope' does not exist.");
}

#[tokio::test]
async fn test_creating_existing_instance_conflicts() {
    let agent = TestAgent::new();
    agent.install_bundle("app", "1.0");
    let params = json!({ "bundle_name": "app", "bundle_version": "1.0" });

    let first = agent.put_json("/instances/foo0/", params.clone()).await;
    agent.wait_job(&first.job_id()).await;

    let second = agent.put_json("/instances/foo0/", params).await;
    let job = agent.wait_job(&second.job_id()).await;

    assert_eq!(job["status"], "failed");
    assert_eq!(job["result"]["type"], "error");
    assert_eq!(job["result"]["data"]["code"], 409);
    assert_eq!(job["result"]["data"]["message"], "Instance 'foo0' already exists.");
}

#[tokio::test]
async fn test_delete_waits_for_create_on_same_instance() {
    let agent = TestAgent::new();
    agent.install_bundle("app", "1.0");

    let create = agent
        .put_json(
            "/instances/foo0/",
            json!({ "bundle_name": "app", "bundle_version": "1.0" }),
        )
        .await;
    let delete = agent
        .request(Method::DELETE, "/instances/foo0/", Body::empty())
        .await;
    assert_eq!(delete.status, StatusCode::ACCEPTED);

    let created = agent.wait_job(&create.job_id()).await;
    let deleted = agent.wait_job(&delete.job_id()).await;
    assert_eq!(created["status"], "ready", "{}", created);
    // Had the delete run first it would have found nothing to remove.
    assert_eq!(deleted["status"], "ready", "{}", deleted);

    let jobs = agent.get("/jobs/").await;
    let ids: Vec<&str> = jobs
        .json
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|job| job["id"].as_str())
        .collect();
    assert_eq!(ids, vec![create.job_id(), delete.job_id()]);

    assert!(!agent.data_root().join("applications/foo0").exists());
}

#[tokio::test]
async fn test_wait_on_finished_job_returns_stored_result() {
    let agent = TestAgent::new();
    agent.create_service_dir("web");

    let response = agent.request(Method::PUT, "/services/web/enable/", Body::empty()).await;
    let id = response.job_id();
    agent.wait_job(&id).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let again = tokio::time::timeout(Duration::from_millis(200), agent.get(&format!("/jobs/{}/wait/", id)))
        .await
        .expect("finished job must be returned immediately");
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.json["status"], "ready");
    assert_eq!(again.json["result"]["data"]["enabled"], true);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let agent = TestAgent::new();

    let response = agent.get("/jobs/0b9f5a8e-3c1d-4e59-9a7b-2f6c8d1e4a30/").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = agent.get("/jobs/not-a-uuid/wait/").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_hostname_is_rejected_before_any_job() {
    let agent = TestAgent::new();

    let response = agent.request(Method::PUT, "/ca/bad..hostname/", TEST_CSR).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.message().to_lowercase().contains("invalid hostname"));
    assert!(agent.state.jobs.list_jobs().await.is_empty());
    assert_eq!(agent.state.locks.lock_count(), 0);
}

#[tokio::test]
async fn test_signing_missing_request_is_not_found() {
    let agent = TestAgent::new();

    let response = agent.request(Method::POST, "/ca/x/sign/", Body::empty()).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.message(), "SigningRequest 'x' does not exist.");
}

#[tokio::test]
async fn test_oversized_csr_is_rejected() {
    let agent = TestAgent::new();

    let body = "A".repeat(4097);
    let response = agent.request(Method::PUT, "/ca/web01/", body).await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(agent.state.jobs.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_signing_request_lifecycle() {
    let agent = TestAgent::new();

    let created = agent.request(Method::PUT, "/ca/web01.example.com/", TEST_CSR).await;
    assert_eq!(created.status, StatusCode::ACCEPTED, "{:?}", created.json);
    assert_eq!(created.json["status"], "ready");

    let request = agent.get("/ca/web01.example.com/").await;
    assert_eq!(request.json, json!({ "name": "web01.example.com", "signed": false }));

    let duplicate = agent.request(Method::PUT, "/ca/web01.example.com/", TEST_CSR).await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let signed = agent
        .request(Method::POST, "/ca/web01.example.com/sign/?overwrite=true", Body::empty())
        .await;
    assert_eq!(signed.status, StatusCode::OK, "{:?}", signed.json);

    let deleted = agent
        .request(Method::DELETE, "/ca/web01.example.com/", Body::empty())
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert!(agent.get("/ca/").await.json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unverifiable_csr_is_removed() {
    let agent = TestAgent::with_binaries("false", "true");

    let response = agent.request(Method::PUT, "/ca/web01/", TEST_CSR).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.message().starts_with("false exited"));
    assert!(!agent.state.config.ca_out_dir().join("web01.csr").exists());
}

#[tokio::test]
async fn test_service_actions() {
    let agent = TestAgent::new();
    agent.create_service_dir("web");

    let stopped = agent.request(Method::PUT, "/services/web/start/", Body::empty()).await;
    let job = agent.wait_job(&stopped.job_id()).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["result"]["data"]["message"], "Service 'web' is not enabled");

    let enabled = agent.request(Method::PUT, "/services/web/enable/", Body::empty()).await;
    assert_eq!(enabled.status, StatusCode::ACCEPTED);
    agent.wait_job(&enabled.job_id()).await;

    let started = agent.request(Method::PUT, "/services/web/start/", Body::empty()).await;
    let job = agent.wait_job(&started.job_id()).await;
    assert_eq!(job["status"], "ready", "{}", job);

    let service = agent.get("/services/web/").await;
    assert_eq!(service.json, json!({ "name": "web", "enabled": true }));

    let invalid = agent.request(Method::PUT, "/services/web/reload/", Body::empty()).await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

    let missing = agent.request(Method::PUT, "/services/db/start/", Body::empty()).await;
    let job = agent.wait_job(&missing.job_id()).await;
    assert_eq!(job["result"]["data"]["code"], 404);
}

#[tokio::test]
async fn test_failing_sv_is_reported() {
    let agent = TestAgent::with_binaries("true", "false");
    agent.create_service_dir("web");

    let enabled = agent.request(Method::PUT, "/services/web/enable/", Body::empty()).await;
    agent.wait_job(&enabled.job_id()).await;

    let restart = agent.request(Method::PUT, "/services/web/restart/", Body::empty()).await;
    let job = agent.wait_job(&restart.job_id()).await;

    assert_eq!(job["status"], "failed");
    assert_eq!(job["result"]["data"]["code"], 500);
    assert_eq!(job["messages"], json!(["sv restart"]));
}

#[tokio::test]
async fn test_bundle_upload_download_and_delete() {
    let agent = TestAgent::new();
    let archive = bundle_archive("2.0");

    let uploaded = agent
        .request(Method::PUT, "/bundles/app/app@2.0.tar.gz", archive.clone())
        .await;
    assert_eq!(uploaded.status, StatusCode::OK, "{:?}", uploaded.json);
    assert_eq!(uploaded.json["result"]["data"]["version"], "2.0");

    let again = agent
        .request(Method::PUT, "/bundles/app/app@2.0.tar.gz", archive.clone())
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.message(), "Bundle 'app@2.0' already exists.");

    let listed = agent.get("/bundles/").await;
    assert_eq!(listed.json, json!([{ "name": "app", "versions": ["2.0"] }]));

    let downloaded = agent.get("/bundles/app/app@2.0.tar.gz").await;
    assert_eq!(downloaded.status, StatusCode::OK);
    assert_eq!(downloaded.body, archive);

    let deleted = agent
        .request(Method::DELETE, "/bundles/app/app@2.0.tar.gz", Body::empty())
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert!(agent.get("/bundles/").await.json.as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deleting_one_version_while_uploading_another() {
    let agent = TestAgent::new();
    let archive = bundle_archive("2.0");

    for i in 0..25 {
        let old = format!("/bundles/app/app@1.{}.tar.gz", i);
        let new = format!("/bundles/app/app@2.{}.tar.gz", i);
        let seeded = agent.request(Method::PUT, &old, archive.clone()).await;
        assert_eq!(seeded.status, StatusCode::OK, "{:?}", seeded.json);

        let (deleted, uploaded) = tokio::join!(
            agent.request(Method::DELETE, &old, Body::empty()),
            agent.request(Method::PUT, &new, archive.clone()),
        );
        assert_eq!(deleted.status, StatusCode::OK, "{:?}", deleted.json);
        assert_eq!(uploaded.status, StatusCode::OK, "{:?}", uploaded.json);

        let removed = agent.request(Method::DELETE, &new, Body::empty()).await;
        assert_eq!(removed.status, StatusCode::OK, "{:?}", removed.json);
    }

    assert!(agent.get("/bundles/").await.json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bundle_upload_validation() {
    let agent = TestAgent::new();

    let wrong_name = agent
        .request(Method::PUT, "/bundles/app/other@1.0.tar.gz", bundle_archive("1.0"))
        .await;
    assert_eq!(wrong_name.status, StatusCode::NOT_FOUND);

    let not_gzip = agent
        .request(Method::PUT, "/bundles/app/app@1.0.tar.gz", "plain text")
        .await;
    assert_eq!(not_gzip.status, StatusCode::BAD_REQUEST);

    assert!(agent.state.jobs.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_facts_info_and_version_headers() {
    let agent = TestAgent::new();

    let facts = agent.get("/facts/").await;
    assert_eq!(facts.status, StatusCode::OK);
    assert_eq!(facts.json["hostname"], "test-agent");
    assert_eq!(facts.json["gnutar"], "tar");
    assert_eq!(
        facts.headers.get("x-cast-agent-version").unwrap(),
        env!("CARGO_PKG_VERSION")
    );
    assert!(facts.headers.contains_key("x-cast-api-version"));

    let info = agent.get("/info/").await;
    assert_eq!(info.json["agent_version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(info.json["jobs"]["total"], 0);

    // Error responses carry the headers too.
    let missing = agent.get("/instances/nope/").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert!(missing.headers.contains_key("x-cast-api-version"));
}

#[tokio::test]
async fn test_health_check_lifecycle() {
    let agent = TestAgent::new();
    let marker = agent.data_root().join("ready");

    let added = agent
        .request(
            Method::POST,
            "/health/",
            json!({
                "check": { "type": "file_exists", "path": marker },
                "interval_secs": 60,
            })
            .to_string(),
        )
        .await;
    assert_eq!(added.status, StatusCode::CREATED, "{:?}", added.json);
    assert_eq!(added.json["scheduled"], true);
    assert_eq!(added.json["status"], "UNKNOWN");
    assert_eq!(added.json["check"]["type"], "file_exists");
    let id = added.json["id"].as_str().unwrap().to_string();

    let idle = agent
        .request(
            Method::POST,
            "/health/",
            json!({
                "check": { "type": "tcp", "ip_address": "127.0.0.1", "port": 1 },
                "schedule": false,
            })
            .to_string(),
        )
        .await;
    assert_eq!(idle.status, StatusCode::CREATED);
    assert_eq!(idle.json["interval_secs"], 90.0);
    assert_eq!(idle.json["check"]["timeout_ms"], 3000);

    assert_eq!(agent.get("/health/").await.json.as_array().map(Vec::len), Some(2));
    let scheduled = agent.get("/health/scheduled/").await;
    assert_eq!(scheduled.json.as_array().map(Vec::len), Some(1));
    assert_eq!(scheduled.json[0]["id"], id.as_str());

    let failed = agent
        .request(Method::POST, &format!("/health/{}/run/", id), Body::empty())
        .await;
    assert_eq!(failed.status, StatusCode::OK);
    assert_eq!(failed.json["status"], "ERROR");

    std::fs::write(&marker, "").unwrap();
    agent
        .request(Method::POST, &format!("/health/{}/run/", id), Body::empty())
        .await;
    let details = agent.get(&format!("/health/{}/details/", id)).await;
    assert_eq!(details.status, StatusCode::OK);
    assert_eq!(details.json["status"], "SUCCESS");
    assert_eq!(details.json["history"][0]["details"], "File exists.");
    assert_eq!(details.json["history"][1]["status"], "ERROR");

    let paused = agent
        .request(Method::POST, &format!("/health/{}/pause/", id), Body::empty())
        .await;
    assert_eq!(paused.json["paused"], true);
    assert_eq!(paused.json["scheduled"], false);
    assert!(agent.get("/health/scheduled/").await.json.as_array().unwrap().is_empty());

    let resumed = agent
        .request(Method::POST, &format!("/health/{}/resume/", id), Body::empty())
        .await;
    assert_eq!(resumed.json["paused"], false);
    assert_eq!(resumed.json["scheduled"], true);

    let removed = agent
        .request(Method::DELETE, &format!("/health/{}/", id), Body::empty())
        .await;
    assert_eq!(removed.status, StatusCode::OK);
    assert_eq!(removed.json["removed"], true);
    assert_eq!(agent.get(&format!("/health/{}/", id)).await.status, StatusCode::NOT_FOUND);
    assert_eq!(agent.get("/health/").await.json.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_unknown_health_check_is_not_found() {
    let agent = TestAgent::new();
    let id = "6f1c2a8e-0c4b-4a57-9f55-2f1d7b0f2d11";

    let missing = agent.get(&format!("/health/{}/details/", id)).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.message(), format!("Check '{}' does not exist.", id));

    for action in ["pause", "resume", "run"] {
        let response = agent
            .request(Method::POST, &format!("/health/{}/{}/", id, action), Body::empty())
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{}", action);
    }
    let deleted = agent
        .request(Method::DELETE, &format!("/health/{}/", id), Body::empty())
        .await;
    assert_eq!(deleted.status, StatusCode::NOT_FOUND);

    assert_eq!(agent.get("/health/not-a-uuid/").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_health_checks_are_rejected() {
    let agent = TestAgent::new();

    for body in [
        json!({}),
        json!({ "check": { "type": "http", "url": "http://localhost/" } }),
        json!({ "check": { "type": "tcp", "ip_address": "127.0.0.1", "port": 80, "match_value": "(" } }),
        json!({ "check": { "type": "file_exists", "path": "/tmp" }, "interval_secs": 0 }),
        json!({ "check": { "type": "gopher" } }),
    ] {
        let response = agent.request(Method::POST, "/health/", body.to_string()).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", body);
    }
    assert!(agent.get("/health/").await.json.as_array().unwrap().is_empty());
}
