//! Process wiring: one SQLite pool shared by every store, and the services
//! built on top of it.

use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    herald_broadcast::{
        BroadcastCoordinator, ListenerRegistry, jobs as broadcast_jobs,
        store_sqlite::SqliteCampaignStore,
    },
    herald_config::HeraldConfig,
    herald_cron::{
        HandlerRegistry, SchedulerOptions, SchedulerService, handler_fn,
        store::JobStore,
        store_file::FileStore,
        store_sqlite::SqliteStore,
        types::{JobCreate, JobPatch, Trigger},
    },
    herald_metrics::MetricsHandle,
    herald_telegram::{ChatDirectory, TelegramOutbound, bot},
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::{debug, info},
};

/// Handler that writes the Prometheus text output to a file.
pub const METRICS_EXPORT: &str = "metrics.export";
pub const METRICS_EXPORT_JOB_ID: &str = "metrics-export";

pub fn default_database_url() -> String {
    format!(
        "sqlite://{}?mode=rwc",
        herald_config::data_dir().join("herald.db").display()
    )
}

/// Open the shared pool and run every crate's migrations.
pub async fn open_database(config: &HeraldConfig) -> Result<SqlitePool> {
    let url = match &config.database.url {
        Some(url) => url.clone(),
        None => {
            let dir = herald_config::data_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            default_database_url()
        },
    };

    let in_memory = url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("invalid database url: {url}"))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {url}"))?;

    herald_cron::run_migrations(&pool)
        .await
        .context("scheduler migrations failed")?;
    herald_broadcast::run_migrations(&pool)
        .await
        .context("broadcast migrations failed")?;
    herald_telegram::run_migrations(&pool)
        .await
        .context("telegram migrations failed")?;
    debug!(url, "database ready");
    Ok(pool)
}

/// Every long-lived service, wired but not started. Building it needs no
/// network access, so management commands reuse it.
pub struct Runtime {
    pub pool: SqlitePool,
    pub chats: Arc<ChatDirectory>,
    pub events: Arc<ListenerRegistry>,
    pub outbound: Arc<TelegramOutbound>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub scheduler: Arc<SchedulerService>,
}

impl Runtime {
    pub async fn build(config: &HeraldConfig, metrics: Option<MetricsHandle>) -> Result<Self> {
        let pool = open_database(config).await?;

        let bot = bot::build_bot(&config.telegram)?;
        let chats = Arc::new(ChatDirectory::with_pool(pool.clone()));
        let outbound =
            Arc::new(TelegramOutbound::new(bot).with_chat_directory(Arc::clone(&chats)));
        let events = ListenerRegistry::new();
        let coordinator = BroadcastCoordinator::new(
            Arc::new(SqliteCampaignStore::with_pool(pool.clone())),
            outbound.clone(),
            events.clone(),
        );

        let handlers = Arc::new(HandlerRegistry::new());
        broadcast_jobs::register_handlers(&handlers, Arc::clone(&coordinator), outbound.clone());
        if let (Some(handle), Some(path)) = (metrics, config.metrics.textfile.clone()) {
            handlers.register(METRICS_EXPORT, metrics_export_handler(handle, path));
        }

        let store: Arc<dyn JobStore> = match &config.scheduler.jobs_file {
            Some(path) => Arc::new(FileStore::at(path.clone())),
            None => Arc::new(SqliteStore::with_pool(pool.clone())),
        };
        let scheduler = SchedulerService::new(
            store,
            handlers,
            SchedulerOptions::from(&config.scheduler),
        );

        Ok(Self {
            pool,
            chats,
            events,
            outbound,
            coordinator,
            scheduler,
        })
    }

    /// Bring the recurring housekeeping jobs in line with the config.
    pub async fn reconcile_jobs(&self, config: &HeraldConfig) -> Result<()> {
        match config.broadcast.progress_report_every_ms {
            Some(every_ms) => {
                broadcast_jobs::ensure_progress_report(&self.scheduler, every_ms).await?;
            },
            None => self.drop_job(broadcast_jobs::PROGRESS_JOB_ID).await?,
        }

        if self.scheduler.handlers().contains(METRICS_EXPORT) {
            let every_ms = config.metrics.export_every_ms;
            let trigger = Trigger::Every {
                every_ms,
                anchor_ms: None,
            };
            match self.scheduler.get(METRICS_EXPORT_JOB_ID).await {
                Some(job) if interval_of(&job.trigger) == Some(every_ms) => {},
                Some(_) => {
                    self.scheduler
                        .update(METRICS_EXPORT_JOB_ID, JobPatch {
                            trigger: Some(trigger),
                            ..JobPatch::default()
                        })
                        .await?;
                },
                None => {
                    self.scheduler
                        .schedule(
                            JobCreate::new("metrics export", METRICS_EXPORT, trigger)
                                .with_id(METRICS_EXPORT_JOB_ID)
                                .with_max_instances(1)
                                .with_coalesce(true),
                        )
                        .await?;
                },
            }
        } else {
            self.drop_job(METRICS_EXPORT_JOB_ID).await?;
        }
        Ok(())
    }

    async fn drop_job(&self, id: &str) -> Result<()> {
        if self.scheduler.get(id).await.is_some() {
            self.scheduler.cancel(id).await?;
            info!(id, "removed job no longer configured");
        }
        Ok(())
    }
}

fn interval_of(trigger: &Trigger) -> Option<u64> {
    match trigger {
        Trigger::Every { every_ms, .. } => Some(*every_ms),
        _ => None,
    }
}

fn metrics_export_handler(
    handle: MetricsHandle,
    path: PathBuf,
) -> Arc<dyn herald_cron::JobHandler> {
    handler_fn(move |_ctx| {
        let handle = handle.clone();
        let path = path.clone();
        async move {
            write_textfile(&path, &handle.render())
                .await
                .map_err(|e| herald_cron::Error::external("metrics export", e))?;
            Ok(Some(format!("wrote {}", path.display())))
        }
    })
}

/// Write through a temp file so a collector never reads a partial file.
pub(crate) async fn write_textfile(path: &std::path::Path, body: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> HeraldConfig {
        let mut config = HeraldConfig::default();
        config.database.url = Some("sqlite::memory:".into());
        config
    }

    #[tokio::test]
    async fn all_migrations_share_one_database() {
        let pool = open_database(&memory_config()).await.unwrap();
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&pool)
                .await
                .unwrap();
        for table in [
            "scheduler_jobs",
            "scheduler_runs",
            "broadcast_campaigns",
            "broadcast_targets",
            "telegram_chats",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn progress_report_follows_config() {
        let mut config = memory_config();
        config.broadcast.progress_report_every_ms = Some(60_000);
        let runtime = Runtime::build(&config, None).await.unwrap();
        runtime.scheduler.load().await.unwrap();

        runtime.reconcile_jobs(&config).await.unwrap();
        assert!(
            runtime
                .scheduler
                .get(broadcast_jobs::PROGRESS_JOB_ID)
                .await
                .is_some()
        );

        config.broadcast.progress_report_every_ms = None;
        runtime.reconcile_jobs(&config).await.unwrap();
        assert!(runtime.scheduler.list().await.is_empty());
    }

    #[tokio::test]
    async fn textfile_write_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.prom");
        write_textfile(&path, "a 1\n").await.unwrap();
        write_textfile(&path, "a 2\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a 2\n");
        assert!(!dir.path().join("herald.prom.tmp").exists());
    }
}
