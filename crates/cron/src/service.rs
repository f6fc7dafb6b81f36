//! Core scheduler: timer loop, bounded job execution, CRUD operations.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    herald_common::Reportable,
    tokio::{
        sync::{Mutex, Notify, RwLock, Semaphore},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, cron as cron_metrics, gauge, histogram};

use crate::{
    Error, Result,
    guard::{ConcurrencyGuard, InstancePermit},
    registry::{HandlerRegistry, JobContext},
    schedule::{compute_next_run, due_fires, validate_trigger},
    store::JobStore,
    types::*,
};

/// Delay before the timer loop retries after the store rejected a write.
const STORE_RETRY_MS: u64 = 1_000;

/// Idle poll interval when no job has a next fire time.
const IDLE_POLL_MS: u64 = 60_000;

/// Scheduler-wide execution settings.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Executions running at once across all jobs.
    pub max_workers: usize,
    pub default_max_instances: usize,
    pub default_coalesce: bool,
    /// Fires later than this are skipped. `None` runs them however late.
    pub misfire_grace_ms: Option<u64>,
    pub stuck_threshold_ms: u64,
    /// Missed fires replayed per job per tick.
    pub max_catchup: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&herald_config::SchedulerConfig::default())
    }
}

impl From<&herald_config::SchedulerConfig> for SchedulerOptions {
    fn from(config: &herald_config::SchedulerConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            default_max_instances: config.default_max_instances.max(1),
            default_coalesce: config.coalesce,
            misfire_grace_ms: config.misfire_grace_ms,
            stuck_threshold_ms: config.stuck_threshold_ms,
            max_catchup: config.max_catchup.max(1),
        }
    }
}

/// What happened to a fire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// An instance slot was taken and the execution was handed to the pool.
    Started,
    /// The job was at its instance cap; the fire was dropped.
    Skipped,
}

/// The job scheduler.
pub struct SchedulerService {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    options: SchedulerOptions,
    /// Working cache of the store's jobs.
    jobs: RwLock<Vec<Job>>,
    guard: Arc<ConcurrencyGuard>,
    workers: Arc<Semaphore>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// First fire time for a freshly scheduled or re-enabled job.
///
/// A one-shot in the past is due immediately; misfire grace decides whether
/// it still runs.
fn initial_next_run(trigger: &Trigger, now: u64) -> Result<Option<u64>> {
    match trigger {
        Trigger::At { at_ms } => Ok(Some(*at_ms)),
        other => compute_next_run(other, now),
    }
}

/// Fill a missing interval anchor so fire times stay stable across restarts.
fn anchor_trigger(trigger: Trigger, now: u64) -> Trigger {
    match trigger {
        Trigger::Every {
            every_ms,
            anchor_ms: None,
        } => Trigger::Every {
            every_ms,
            anchor_ms: Some(now),
        },
        other => other,
    }
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(options.max_workers.max(1)));
        Arc::new(Self {
            store,
            handlers,
            options,
            jobs: RwLock::new(Vec::new()),
            guard: ConcurrencyGuard::new(),
            workers,
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Load jobs from the store and start the timer loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.load().await?;
        *self.running.write().await = true;

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });

        *self.timer_handle.lock().await = Some(handle);
        info!("scheduler started");
        Ok(())
    }

    /// Stop the timer loop. Executions already handed to the pool finish.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        let mut handle = self.timer_handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
        info!("scheduler stopped");
    }

    /// Persist a new job, then add it to the working cache.
    pub async fn schedule(&self, create: JobCreate) -> Result<Job> {
        if !self.handlers.contains(&create.handler) {
            return Err(Error::unknown_handler(&create.handler));
        }
        validate_trigger(&create.trigger)?;
        let max_instances = create
            .max_instances
            .unwrap_or(self.options.default_max_instances);
        if max_instances == 0 {
            return Err(Error::message("max_instances must be at least 1"));
        }

        let now = now_ms();
        let trigger = anchor_trigger(create.trigger, now);
        let mut job = Job {
            id: create
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: create.name,
            handler: create.handler,
            args: create.args,
            trigger,
            max_instances,
            coalesce: create.coalesce.unwrap_or(self.options.default_coalesce),
            misfire_grace_ms: create.misfire_grace_ms.or(self.options.misfire_grace_ms),
            enabled: create.enabled,
            state: JobState::default(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        if job.enabled {
            job.state.next_run_at_ms = initial_next_run(&job.trigger, now)?;
        }

        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(Error::message(format!("job already exists: {}", job.id)));
        }
        self.store.save_job(&job).await?;
        jobs.push(job.clone());
        drop(jobs);

        self.wake_notify.notify_one();
        info!(id = %job.id, name = %job.name, handler = %job.handler, "job scheduled");
        Ok(job)
    }

    /// Update an existing job.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        if let Some(trigger) = &patch.trigger {
            validate_trigger(trigger)?;
        }
        if patch.max_instances == Some(0) {
            return Err(Error::message("max_instances must be at least 1"));
        }

        let now = now_ms();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::job_not_found(id))?;
        let mut updated = job.clone();

        let reschedule = patch.trigger.is_some() || (patch.enabled == Some(true) && !job.enabled);
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(trigger) = patch.trigger {
            updated.trigger = anchor_trigger(trigger, now);
        }
        if let Some(args) = patch.args {
            updated.args = args;
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if let Some(max) = patch.max_instances {
            updated.max_instances = max;
        }
        if let Some(coalesce) = patch.coalesce {
            updated.coalesce = coalesce;
        }
        updated.updated_at_ms = now;

        if !updated.enabled {
            updated.state.next_run_at_ms = None;
        } else if reschedule {
            updated.state.next_run_at_ms = initial_next_run(&updated.trigger, now)?;
        }

        self.store.update_job(&updated).await?;
        *job = updated.clone();
        drop(jobs);

        self.wake_notify.notify_one();
        info!(id, "job updated");
        Ok(updated)
    }

    /// Remove a job. A running instance completes; no further fires occur.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        self.store.delete_job(id).await?;
        jobs.retain(|j| j.id != id);
        drop(jobs);
        info!(id, "job cancelled");
        Ok(())
    }

    pub async fn list(&self) -> Vec<Job> {
        self.jobs.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// Fire a job now, outside its schedule. Does not move its next fire time.
    pub async fn trigger(self: &Arc<Self>, id: &str) -> Result<FireOutcome> {
        let job = self.get(id).await.ok_or_else(|| Error::job_not_found(id))?;
        Ok(self.fire(job, now_ms()).await)
    }

    /// Run history for a job, oldest first.
    pub async fn runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        self.store.get_runs(job_id, limit).await
    }

    /// Lifecycle phase of a job as seen by this scheduler.
    pub async fn phase(&self, id: &str) -> Result<JobPhase> {
        let job = self.get(id).await.ok_or_else(|| Error::job_not_found(id))?;
        let running = self.guard.running(id);
        if running > 0 {
            return Ok(JobPhase::Running(running));
        }
        Ok(match job.state.next_run_at_ms {
            Some(at) if job.enabled && at <= now_ms() => JobPhase::Due,
            _ => JobPhase::Scheduled,
        })
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs.read().await;
        let running = *self.running.read().await;
        let enabled_count = jobs.iter().filter(|j| j.enabled).count();
        let next_run_at_ms = jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min();

        #[cfg(feature = "metrics")]
        gauge!(cron_metrics::JOBS_SCHEDULED).set(jobs.len() as f64);

        SchedulerStatus {
            running,
            job_count: jobs.len(),
            enabled_count,
            running_instances: self.guard.total_running(),
            next_run_at_ms,
        }
    }

    /// Replace the working cache with the store's contents.
    ///
    /// Persisted next-run times are kept so fires missed while the process
    /// was down are seen as due on the first tick. Called by [`Self::start`];
    /// call it directly to manage jobs without running the timer.
    pub async fn load(&self) -> Result<()> {
        let mut loaded = self.store.load_jobs().await?;
        let now = now_ms();
        for job in &mut loaded {
            if job.enabled && job.state.next_run_at_ms.is_none() && !job.trigger.is_one_shot() {
                job.state.next_run_at_ms = compute_next_run(&job.trigger, now).unwrap_or(None);
            }
        }
        info!(count = loaded.len(), "loaded scheduled jobs");
        *self.jobs.write().await = loaded;
        Ok(())
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_ms = self.ms_until_next_wake().await;

            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            if !self.process_due_jobs().await {
                tokio::time::sleep(Duration::from_millis(STORE_RETRY_MS)).await;
            }
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let jobs = self.jobs.read().await;
        let now = now_ms();
        jobs.iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .map(|t| t.saturating_sub(now))
            .min()
            .unwrap_or(IDLE_POLL_MS)
    }

    /// Advance every due job, persist the advance, then dispatch its fires.
    ///
    /// Returns `false` if the store rejected a write; the affected jobs stay
    /// due and are retried on the next tick.
    async fn process_due_jobs(self: &Arc<Self>) -> bool {
        let now = now_ms();
        self.clear_stuck(now).await;

        let mut healthy = true;
        let mut plan = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            let mut gone = Vec::new();
            for job in jobs.iter_mut().filter(|j| j.enabled) {
                let Some(first_due) = job.state.next_run_at_ms else {
                    continue;
                };
                if first_due > now {
                    continue;
                }

                let fires = due_fires(&job.trigger, first_due, now, self.options.max_catchup);
                let mut advanced = job.clone();
                advanced.state.next_run_at_ms = compute_next_run(&job.trigger, now).unwrap_or(None);

                match self.store.update_job(&advanced).await {
                    Ok(()) => {},
                    Err(e) if e.is_not_found() => {
                        info!(id = %job.id, "job removed from the store, dropping it");
                        gone.push(job.id.clone());
                        continue;
                    },
                    Err(e) => {
                        error!(id = %job.id, error = %e, "failed to persist next fire time");
                        healthy = false;
                        continue;
                    },
                }
                *job = advanced;

                let (late, timely): (Vec<u64>, Vec<u64>) = fires.into_iter().partition(|at| {
                    job.misfire_grace_ms
                        .is_some_and(|grace| now.saturating_sub(*at) > grace)
                });
                let to_run = if job.coalesce {
                    timely.last().copied().into_iter().collect()
                } else {
                    timely
                };
                plan.push((job.clone(), late, to_run));
            }
            jobs.retain(|j| !gone.contains(&j.id));
        }

        for (job, late, to_run) in plan {
            for at in late {
                debug!(id = %job.id, scheduled_for = at, "fire missed its grace time");
                self.record_skip(&job, at, "missed by more than the grace time")
                    .await;
            }
            let mut started = false;
            for at in to_run {
                #[cfg(feature = "metrics")]
                histogram!(cron_metrics::TIMER_LOOP_LATENCY_SECONDS)
                    .record(now.saturating_sub(at) as f64 / 1000.0);
                started |= self.fire(job.clone(), at).await == FireOutcome::Started;
            }
            // A started one-shot is retired when its execution ends.
            if job.trigger.is_one_shot() && !started {
                self.retire_if_exhausted(&job.id).await;
            }
        }
        healthy
    }

    /// Take an instance slot and hand the execution to the worker pool, or
    /// record a skip if the job is at its cap.
    async fn fire(self: &Arc<Self>, job: Job, scheduled_for_ms: u64) -> FireOutcome {
        let Some(permit) = self
            .guard
            .try_acquire(&job.id, job.max_instances, now_ms())
        else {
            info!(id = %job.id, max_instances = job.max_instances, "job at instance cap, skipping fire");
            self.record_skip(&job, scheduled_for_ms, "max instances reached")
                .await;
            return FireOutcome::Skipped;
        };

        let instance = permit.instance();
        let job_id = job.id.clone();
        let svc = Arc::clone(self);
        let task = tokio::spawn(async move {
            let Ok(_worker) = Arc::clone(&svc.workers).acquire_owned().await else {
                return;
            };
            svc.execute(&job, scheduled_for_ms, permit).await;
        });
        self.guard.attach(&job_id, instance, task.abort_handle());
        FireOutcome::Started
    }

    async fn execute(&self, job: &Job, scheduled_for_ms: u64, permit: InstancePermit) {
        let started = now_ms();
        info!(id = %job.id, name = %job.name, scheduled_for = scheduled_for_ms, "executing job");

        #[cfg(feature = "metrics")]
        counter!(cron_metrics::EXECUTIONS_TOTAL).increment(1);

        let result = match self.handlers.get(&job.handler) {
            Some(handler) => {
                handler
                    .run(JobContext {
                        job_id: job.id.clone(),
                        job_name: job.name.clone(),
                        args: job.args.clone(),
                        scheduled_for_ms,
                    })
                    .await
            },
            None => Err(Error::unknown_handler(&job.handler)),
        };
        drop(permit);

        let finished = now_ms();
        let duration_ms = finished.saturating_sub(started);
        let (status, error_msg, output) = match result {
            Ok(output) => (RunStatus::Ok, None, output),
            Err(e) => {
                error!(id = %job.id, error = %e, "job failed");
                #[cfg(feature = "metrics")]
                counter!(cron_metrics::ERRORS_TOTAL).increment(1);
                (RunStatus::Error, Some(e.to_string()), None)
            },
        };

        #[cfg(feature = "metrics")]
        histogram!(cron_metrics::EXECUTION_DURATION_SECONDS).record(duration_ms as f64 / 1000.0);

        let run = RunRecord {
            job_id: job.id.clone(),
            scheduled_for_ms,
            started_at_ms: started,
            finished_at_ms: finished,
            status,
            error: error_msg.clone(),
            duration_ms,
            output,
        };
        if let Err(e) = self.store.append_run(&run).await {
            warn!(error = %e, "failed to record job run");
        }

        self.update_state(&job.id, |state| {
            state.last_run_at_ms = Some(finished);
            state.last_status = Some(status);
            state.last_error = error_msg;
            state.last_duration_ms = Some(duration_ms);
            state.run_count += 1;
        })
        .await;

        if job.trigger.is_one_shot() {
            self.retire_if_exhausted(&job.id).await;
        }

        info!(id = %job.id, status = ?status, duration_ms, "job finished");
    }

    /// Remove a one-shot job once it has fired and no instance is running.
    async fn retire_if_exhausted(&self, id: &str) {
        let mut jobs = self.jobs.write().await;
        let exhausted = jobs
            .iter()
            .find(|j| j.id == id)
            .is_some_and(|j| j.state.next_run_at_ms.is_none());
        if !exhausted || self.guard.running(id) > 0 {
            return;
        }
        match self.store.delete_job(id).await {
            Ok(()) => info!(id, "one-shot job completed and removed"),
            Err(e) if e.is_not_found() => {},
            Err(e) => {
                warn!(id, error = %e, "failed to remove completed one-shot job");
                return;
            },
        }
        jobs.retain(|j| j.id != id);
    }

    async fn record_skip(&self, job: &Job, scheduled_for_ms: u64, reason: &str) {
        #[cfg(feature = "metrics")]
        counter!(cron_metrics::SKIPPED_TOTAL).increment(1);

        let now = now_ms();
        let run = RunRecord {
            job_id: job.id.clone(),
            scheduled_for_ms,
            started_at_ms: now,
            finished_at_ms: now,
            status: RunStatus::Skipped,
            error: Some(reason.to_string()),
            duration_ms: 0,
            output: None,
        };
        if let Err(e) = self.store.append_run(&run).await {
            warn!(error = %e, "failed to record skipped fire");
        }
        self.update_state(&job.id, |state| state.skip_count += 1)
            .await;
    }

    /// Apply `f` to the cached state and persist it.
    ///
    /// A job cancelled in the meantime is no longer cached and is left alone.
    async fn update_state<F: FnOnce(&mut JobState)>(&self, id: &str, f: F) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return;
        };
        f(&mut job.state);
        match self.store.update_job(job).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => {},
            Err(e) => warn!(id, error = %e, "failed to persist job state"),
        }
    }

    async fn clear_stuck(&self, now: u64) {
        let threshold = self.options.stuck_threshold_ms;
        for id in self.guard.release_stuck(now, threshold) {
            warn!(id = %id, threshold_ms = threshold, "aborted stuck job instance");
            #[cfg(feature = "metrics")]
            counter!(cron_metrics::STUCK_JOBS_CLEARED_TOTAL).increment(1);
            self.update_state(&id, |state| {
                state.last_status = Some(RunStatus::Error);
                state.last_error = Some(format!("stuck: exceeded {threshold}ms"));
            })
            .await;
            let one_shot = self
                .get(&id)
                .await
                .is_some_and(|job| job.trigger.is_one_shot());
            if one_shot {
                self.retire_if_exhausted(&id).await;
            }
        }
    }
}

#[async_trait]
impl Reportable for SchedulerService {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn report(&self) -> herald_common::Result<Vec<String>> {
        let status = self.status().await;
        let mut lines = vec![format!(
            "Scheduler: {} ({} jobs, {} enabled, {} running)",
            if status.running { "running" } else { "stopped" },
            status.job_count,
            status.enabled_count,
            status.running_instances,
        )];
        if let Some(next) = status.next_run_at_ms {
            let secs = next.saturating_sub(now_ms()) / 1000;
            lines.push(format!("Next fire in {secs}s"));
        }
        Ok(lines)
    }
}
