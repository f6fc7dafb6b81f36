mod broadcast_commands;
mod config_commands;
mod daemon;
mod db_commands;
mod jobs_commands;
mod runtime;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    herald_common::ReportRegistry,
    herald_config::HeraldConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "herald", about = "Herald: resumable Telegram broadcasts and scheduled jobs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./herald.toml and ~/.config/herald/).
    #[arg(long, global = true, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default when no subcommand is provided).
    Run,
    /// Inspect or stop the persisted broadcast.
    Broadcast {
        #[command(subcommand)]
        action: broadcast_commands::BroadcastAction,
    },
    /// Manage scheduled jobs.
    Jobs {
        #[command(subcommand)]
        action: jobs_commands::JobsAction,
    },
    /// Print the stats report.
    Stats,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Database management (reset, migrate).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HeraldConfig> {
    match path {
        Some(path) => {
            let mut config = herald_config::load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            herald_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            Ok(config)
        },
        None => Ok(herald_config::discover_and_load()),
    }
}

/// Render epoch millis as a UTC timestamp for terminal output.
pub(crate) fn format_ms(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn stats(config: &HeraldConfig) -> anyhow::Result<()> {
    let runtime = runtime::Runtime::build(config, None).await?;
    runtime.scheduler.load().await?;
    let reports = ReportRegistry::new()
        .with(runtime.scheduler.clone())
        .with(runtime.coordinator.clone())
        .with(runtime.chats.clone());
    print!("{}", reports.render("Stats").await);
    runtime.pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "herald starting");

    let config = || load_config(cli.config.as_ref());
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => daemon::run(config()?).await,
        Commands::Broadcast { action } => {
            broadcast_commands::handle_broadcast(&config()?, action).await
        },
        Commands::Jobs { action } => jobs_commands::handle_jobs(&config()?, action).await,
        Commands::Stats => stats(&config()?).await,
        Commands::Config { action } => {
            config_commands::handle_config(cli.config.as_ref(), action)
        },
        Commands::Db { action } => db_commands::handle_db(&config()?, action).await,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn jobs_send_accepts_negative_chat_ids() {
        let cli = Cli::try_parse_from(["herald", "jobs", "send", "-100", "in 5m", "hello"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Jobs {
                action: jobs_commands::JobsAction::Send { target: -100, .. }
            })
        ));
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_ms(0), "1970-01-01 00:00:00 UTC");
    }

    #[tokio::test]
    async fn explicit_config_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.toml");
        std::fs::write(&path, "[scheduler]\nmax_workers = 2\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.scheduler.max_workers, 2);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
