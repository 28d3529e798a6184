use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            uploads: UploadsConfig::default(),
            inference: InferenceConfig::default(),
            reaper: ReaperConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Answer 404 instead of 403 for records owned by someone else.
    #[serde(default = "default_true")]
    pub hide_foreign_resources: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            hide_foreign_resources: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.fallwatch/data/fallwatch.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Defaults to `~/.fallwatch/uploads`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// What to do when the model cannot produce a result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Mark the job failed.
    #[default]
    Fail,
    /// Complete the job with a simulated result.
    Simulate,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "fail",
            FailurePolicy::Simulate => "simulate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Reported when the model does not name its own version.
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

fn default_command() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["inference.py".to_string()]
}

fn default_sensitivity() -> f64 {
    0.5
}

fn default_confidence_threshold() -> f64 {
    0.85
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_model_version() -> String {
    "1.0.0".to_string()
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            sensitivity: default_sensitivity(),
            confidence_threshold: default_confidence_threshold(),
            timeout_secs: default_timeout_secs(),
            on_failure: FailurePolicy::default(),
            model_version: default_model_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    /// Must exceed `inference.timeout_secs`.
    #[serde(default = "default_reaper_grace")]
    pub grace_secs: u64,
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_reaper_grace() -> u64 {
    900
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_reaper_interval(),
            grace_secs: default_reaper_grace(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Database file, falling back to the per-user default location.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(crate::db::default_database_path)
            .unwrap_or_else(|| PathBuf::from("fallwatch.db"))
    }

    /// Directory for stored uploads, falling back to `~/.fallwatch/uploads`.
    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads
            .directory
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".fallwatch").join("uploads")))
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }
}
