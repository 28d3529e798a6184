//! Test harness for isolated test execution.
//!
//! Each `TestHarness` owns a temp directory with `uploads/` and `scripts/`
//! subdirectories and an in-memory database shared by its stores.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;

use fallwatch::analysis::{AnalysisService, AnalysisSettings, UploadedMedia};
use fallwatch::broadcast::JobEventBroadcaster;
use fallwatch::config::{Config, FailurePolicy};
use fallwatch::http::AppState;
use fallwatch::inference::{InferenceRunner, SubprocessRunner};
use fallwatch::model::{AnalysisJob, JobStatus};
use fallwatch::store::{AlertStore, JobStore};
use fallwatch::Database;

/// Test harness providing an isolated environment for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    pub uploads_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub db: Database,
    pub jobs: JobStore,
    pub alerts: AlertStore,
    pub events: JobEventBroadcaster,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let uploads_dir = temp_dir.path().join("uploads");
        let scripts_dir = temp_dir.path().join("scripts");
        std::fs::create_dir_all(&uploads_dir).expect("Failed to create uploads dir");
        std::fs::create_dir_all(&scripts_dir).expect("Failed to create scripts dir");

        let db = Database::open_in_memory().expect("Failed to create test database");
        Self {
            temp_dir,
            uploads_dir,
            scripts_dir,
            jobs: JobStore::new(db.clone()),
            alerts: AlertStore::new(db.clone()),
            db,
            events: JobEventBroadcaster::new(64),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a shell script standing in for the model. It is invoked as
    /// `/bin/sh <script> --video <path> --sensitivity <f> --confidence <f>`.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.scripts_dir.join(name);
        std::fs::write(&path, body).expect("Failed to write script");
        path
    }

    /// Writes a fake video into the uploads directory.
    pub fn write_upload(&self, name: &str, content: &[u8]) -> UploadedMedia {
        let path = self.uploads_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write upload");
        UploadedMedia {
            path,
            size: content.len() as u64,
            content_type: Some("video/mp4".to_string()),
            original_name: Some(name.to_string()),
        }
    }

    pub fn settings(on_failure: FailurePolicy, timeout: Duration) -> AnalysisSettings {
        AnalysisSettings {
            on_failure,
            timeout,
            ..AnalysisSettings::default()
        }
    }

    /// Service backed by `/bin/sh <script>`.
    pub fn script_service(
        &self,
        script: &Path,
        on_failure: FailurePolicy,
        timeout: Duration,
    ) -> AnalysisService {
        let runner = SubprocessRunner::new(
            "/bin/sh",
            vec![script.to_string_lossy().into_owned()],
            timeout,
        );
        self.service(Arc::new(runner), Self::settings(on_failure, timeout))
    }

    pub fn service(
        &self,
        runner: Arc<dyn InferenceRunner>,
        settings: AnalysisSettings,
    ) -> AnalysisService {
        AnalysisService::new(self.jobs.clone(), runner, self.events.clone(), settings)
    }

    /// Polls until the job leaves `processing`.
    pub async fn wait_terminal(&self, id: &str, within: Duration) -> AnalysisJob {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let job = self
                .jobs
                .get(id)
                .expect("Failed to read job")
                .expect("Job missing");
            if job.status != JobStatus::Processing {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} still processing after {:?}",
                id,
                within
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Serves the HTTP API on an ephemeral port.
    pub async fn spawn_server(&self, service: AnalysisService, hide_foreign: bool) -> SocketAddr {
        let mut config = Config::default();
        config.uploads.directory = Some(self.uploads_dir.clone());
        config.server.hide_foreign_resources = hide_foreign;
        let state = AppState::new(service, self.alerts.clone(), &config);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local addr");
        tokio::spawn(fallwatch::serve(listener, state, std::future::pending()));
        addr
    }
}
