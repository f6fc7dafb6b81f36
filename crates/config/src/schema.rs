//! Config schema types.

use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub scheduler: SchedulerConfig,
    pub broadcast: BroadcastConfig,
    pub metrics: MetricsConfig,
}

/// Where campaign and job state is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL. When unset, `<data_dir>/herald.db` is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Telegram bot settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// User ids allowed to run operator commands.
    pub operators: Vec<i64>,

    /// Long-polling timeout passed to getUpdates (seconds).
    pub poll_timeout_secs: u32,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("operators", &self.operators)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            operators: Vec::new(),
            poll_timeout_secs: 30,
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Job scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on job executions running at once across all jobs.
    pub max_workers: usize,
    /// Per-job instance cap used when a job does not set its own.
    pub default_max_instances: usize,
    /// Whether missed fires are merged into one run by default.
    pub coalesce: bool,
    /// Fires later than this past their due time are skipped. `None` runs them regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub misfire_grace_ms: Option<u64>,
    /// Running instances older than this are considered stuck and released.
    pub stuck_threshold_ms: u64,
    /// Upper bound on missed fires replayed for one job in a single tick.
    pub max_catchup: usize,
    /// Keep jobs in this JSON file instead of the database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            default_max_instances: 3,
            coalesce: false,
            misfire_grace_ms: None,
            stuck_threshold_ms: 2 * 60 * 60 * 1000,
            max_catchup: 10,
            jobs_file: None,
        }
    }
}

/// Broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Schedule a recurring progress report for the active campaign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_report_every_ms: Option<u64>,
    /// Resume a persisted campaign automatically at startup.
    pub resume_on_boot: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            progress_report_every_ms: None,
            resume_on_boot: true,
        }
    }
}

/// Metrics export settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Write Prometheus text output here every `export_every_ms`, for a
    /// node_exporter textfile collector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub textfile: Option<PathBuf>,
    pub export_every_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            textfile: None,
            export_every_ms: 60_000,
        }
    }
}
