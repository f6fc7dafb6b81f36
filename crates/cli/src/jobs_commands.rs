use {
    anyhow::{Result, bail},
    clap::Subcommand,
};

use {
    herald_broadcast::jobs::MESSAGE_SEND,
    herald_config::HeraldConfig,
    herald_cron::{
        SchedulerService,
        parse::parse_trigger,
        types::{Job, JobCreate, JobPatch, RunStatus, Trigger},
    },
};

use crate::{format_ms, runtime::Runtime};

#[derive(Subcommand)]
pub enum JobsAction {
    /// List scheduled jobs.
    List,
    /// Show recent runs of a job.
    Runs {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Remove a job.
    Cancel { id: String },
    /// Stop a job from firing until resumed.
    Pause { id: String },
    /// Re-enable a paused job.
    Resume { id: String },
    /// Send a message to one chat later.
    Send {
        /// Chat id. Group ids are negative.
        #[arg(allow_negative_numbers = true)]
        target: i64,
        /// When to send: "in 10m" or "at 2025-06-01T09:00:00Z".
        when: String,
        /// Message text.
        text: String,
    },
}

/// Jobs are managed directly in the database. A running bot only sees the
/// changes after a restart.
pub async fn handle_jobs(config: &HeraldConfig, action: JobsAction) -> Result<()> {
    let runtime = Runtime::build(config, None).await?;
    let scheduler = &runtime.scheduler;
    scheduler.load().await?;

    match action {
        JobsAction::List => list(scheduler).await,
        JobsAction::Runs { id, limit } => {
            let runs = scheduler.runs(&id, limit).await?;
            if runs.is_empty() {
                println!("No runs recorded for {id}.");
            }
            for run in runs {
                let status = match run.status {
                    RunStatus::Ok => "ok",
                    RunStatus::Error => "error",
                    RunStatus::Skipped => "skipped",
                };
                let detail = run.error.or(run.output).unwrap_or_default();
                println!(
                    "{}  {:<7} {:>6}ms  {detail}",
                    format_ms(run.scheduled_for_ms),
                    status,
                    run.duration_ms
                );
            }
        },
        JobsAction::Cancel { id } => match scheduler.cancel(&id).await {
            Ok(()) => println!("Cancelled {id}."),
            Err(e) if e.is_not_found() => println!("No such job: {id}"),
            Err(e) => return Err(e.into()),
        },
        JobsAction::Pause { id } => set_enabled(scheduler, &id, false).await?,
        JobsAction::Resume { id } => set_enabled(scheduler, &id, true).await?,
        JobsAction::Send { target, when, text } => {
            let trigger = parse_trigger(&when, now_ms())?;
            if !trigger.is_one_shot() {
                bail!("`{when}` repeats; use \"in <duration>\" or \"at <time>\"");
            }
            let job = scheduler
                .schedule(
                    JobCreate::new(format!("send to {target}"), MESSAGE_SEND, trigger)
                        .with_args(serde_json::json!({ "target": target, "text": text }))
                        .with_max_instances(1),
                )
                .await?;
            println!(
                "Scheduled {} for {}.",
                job.id,
                job.state.next_run_at_ms.map(format_ms).unwrap_or_default()
            );
        },
    }

    runtime.pool.close().await;
    Ok(())
}

async fn list(scheduler: &SchedulerService) {
    let mut jobs = scheduler.list().await;
    if jobs.is_empty() {
        println!("No scheduled jobs.");
        return;
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    for job in &jobs {
        let next = match (job.enabled, job.state.next_run_at_ms) {
            (false, _) => "paused".to_string(),
            (true, Some(at)) => format_ms(at),
            (true, None) => "-".to_string(),
        };
        println!(
            "{:<36}  {:<24} {:<18} {:<28} next: {next}  runs: {}",
            job.id,
            job.name,
            job.handler,
            describe_trigger(&job.trigger),
            job.state.run_count
        );
    }
}

async fn set_enabled(scheduler: &SchedulerService, id: &str, enabled: bool) -> Result<()> {
    let patch = JobPatch {
        enabled: Some(enabled),
        ..JobPatch::default()
    };
    match scheduler.update(id, patch).await {
        Ok(job) => println!(
            "{} {}.",
            if enabled { "Resumed" } else { "Paused" },
            job_label(&job)
        ),
        Err(e) if e.is_not_found() => println!("No such job: {id}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn job_label(job: &Job) -> String {
    format!("{} ({})", job.name, job.id)
}

fn describe_trigger(trigger: &Trigger) -> String {
    match trigger {
        Trigger::At { at_ms } => format!("at {}", format_ms(*at_ms)),
        Trigger::Every { every_ms, .. } => format!("every {}s", every_ms / 1000),
        Trigger::Cron { expr, tz: Some(tz) } => format!("cron {expr} ({tz})"),
        Trigger::Cron { expr, tz: None } => format!("cron {expr}"),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
