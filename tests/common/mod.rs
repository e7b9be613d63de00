#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use cast_agent::{
    config::AgentConfig,
    core::{FactKind, FactsProvider},
    routes::create_router,
    AppState,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_CSR: &str = "-----BEGIN CERTIFICATE REQUEST-----\nMIIBVjCBwAIBADAXMRUwEwYDVQQDDAx3ZWIwMS5leGFtcGxl\n-----END CERTIFICATE REQUEST-----\n";

/// Facts answered from fixed values so tests never touch the host.
pub fn test_facts() -> FactsProvider {
    FactsProvider::new(Duration::from_secs(600))
        .with_override(FactKind::Arch, json!("x86_64"))
        .with_override(FactKind::Hostname, json!("test-agent"))
        .with_override(FactKind::Kernel, json!("Linux 6.1.0"))
        .with_override(FactKind::GnuTar, json!("tar"))
        .with_override(FactKind::RunsvdirRunning, json!(false))
}

/// An agent rooted in a temporary directory, driven through its router.
pub struct TestAgent {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestAgent {
    pub fn new() -> Self {
        Self::with_binaries("true", "true")
    }

    /// Use `openssl` and `sv` in place of the real binaries; `true` and
    /// `false` make every invocation succeed or fail.
    pub fn with_binaries(openssl: &str, sv: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = AgentConfig::for_data_root(dir.path());
        config.openssl_binary = openssl.to_string();
        config.sv_binary = sv.to_string();

        let state = AppState::build(config, test_facts()).expect("failed to build agent");
        let router = create_router(state.clone());
        Self { dir, state, router }
    }

    pub fn data_root(&self) -> &Path {
        self.dir.path()
    }

    pub async fn request(&self, method: Method, uri: &str, body: impl Into<Body>) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .expect("failed to build request");

        let response = self.router.clone().oneshot(request).await.expect("router failed");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            body: bytes.to_vec(),
            json,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, Body::empty()).await
    }

    pub async fn put_json(&self, uri: &str, body: Value) -> TestResponse {
        self.request(Method::PUT, uri, body.to_string()).await
    }

    /// Wait for a job through the API and return its final JSON.
    pub async fn wait_job(&self, id: &str) -> Value {
        let response = self.get(&format!("/jobs/{}/wait/", id)).await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.json);
        response.json
    }

    /// Store a bundle archive as if it had been uploaded.
    pub fn install_bundle(&self, bundle: &str, version: &str) -> PathBuf {
        let path = self.state.bundles.archive_path(bundle, version);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bundle_archive(version)).unwrap();
        path
    }

    pub fn create_service_dir(&self, name: &str) -> PathBuf {
        let path = self.state.config.service_dir.join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("run"), "#!/bin/sh\nexec sleep 3600\n").unwrap();
        path
    }

    pub fn write_csr(&self, hostname: &str) -> PathBuf {
        let out = self.state.config.ca_out_dir();
        std::fs::create_dir_all(&out).unwrap();
        let path = out.join(format!("{}.csr", hostname));
        std::fs::write(&path, TEST_CSR).unwrap();
        path
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub json: Value,
}

impl TestResponse {
    pub fn message(&self) -> &str {
        self.json["message"].as_str().unwrap_or_default()
    }

    pub fn job_id(&self) -> String {
        self.json["id"].as_str().expect("response is not a job").to_string()
    }
}

/// A small gzip-compressed tarball with one file recording `version`.
pub fn bundle_archive(version: &str) -> Vec<u8> {
    let staging = tempfile::tempdir().unwrap();
    let content = staging.path().join("content");
    std::fs::create_dir_all(content.join("bin")).unwrap();
    std::fs::write(content.join("VERSION"), version).unwrap();
    std::fs::write(content.join("bin/run"), "#!/bin/sh\necho running\n").unwrap();

    let archive = staging.path().join("bundle.tar.gz");
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(&content)
        .arg(".")
        .status()
        .expect("tar is required for bundle tests");
    assert!(status.success());

    std::fs::read(archive).unwrap()
}
