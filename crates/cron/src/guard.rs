//! Per-job instance accounting.
//!
//! A fire may only start if the job has fewer than `max_instances` running
//! instances. The check and the increment happen under one lock, so two
//! concurrent fires can never both take the last slot. A stuck instance is
//! aborted before its slot is given back.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::task::AbortHandle;

struct Instance {
    started_at_ms: u64,
    /// Set once the executing task is spawned.
    task: Option<AbortHandle>,
}

#[derive(Default)]
struct Slots {
    /// job id -> (instance id -> instance)
    running: HashMap<String, HashMap<u64, Instance>>,
}

/// Tracks running instances per job.
#[derive(Default)]
pub struct ConcurrencyGuard {
    slots: Mutex<Slots>,
    next_instance: AtomicU64,
}

impl ConcurrencyGuard {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a slot for `job_id` if fewer than `max` instances are running.
    pub fn try_acquire(
        self: &Arc<Self>,
        job_id: &str,
        max: usize,
        now_ms: u64,
    ) -> Option<InstancePermit> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let instances = slots.running.entry(job_id.to_string()).or_default();
        if instances.len() >= max {
            return None;
        }
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        instances.insert(instance, Instance {
            started_at_ms: now_ms,
            task: None,
        });
        Some(InstancePermit {
            guard: Arc::clone(self),
            job_id: job_id.to_string(),
            instance,
        })
    }

    /// Number of instances currently running for `job_id`.
    pub fn running(&self, job_id: &str) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.running.get(job_id).map_or(0, HashMap::len)
    }

    /// Total running instances across all jobs.
    pub fn total_running(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.running.values().map(HashMap::len).sum()
    }

    /// Record the task executing an instance so it can be aborted.
    ///
    /// A no-op if the instance already finished.
    pub fn attach(&self, job_id: &str, instance: u64, task: AbortHandle) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(instance) = slots
            .running
            .get_mut(job_id)
            .and_then(|instances| instances.get_mut(&instance))
        {
            instance.task = Some(task);
        }
    }

    /// Abort and release instances that started more than `threshold_ms` ago.
    ///
    /// Returns the ids of the affected jobs, one entry per released instance.
    /// An instance whose task is not attached yet keeps its slot.
    pub fn release_stuck(&self, now_ms: u64, threshold_ms: u64) -> Vec<String> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut released = Vec::new();
        for (job_id, instances) in &mut slots.running {
            instances.retain(|_, instance| {
                if now_ms.saturating_sub(instance.started_at_ms) <= threshold_ms {
                    return true;
                }
                let Some(task) = &instance.task else {
                    return true;
                };
                task.abort();
                released.push(job_id.clone());
                false
            });
        }
        slots.running.retain(|_, instances| !instances.is_empty());
        released
    }

    fn release(&self, job_id: &str, instance: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(instances) = slots.running.get_mut(job_id) {
            instances.remove(&instance);
            if instances.is_empty() {
                slots.running.remove(job_id);
            }
        }
    }
}

/// A held instance slot; released on drop.
pub struct InstancePermit {
    guard: Arc<ConcurrencyGuard>,
    job_id: String,
    instance: u64,
}

impl InstancePermit {
    pub fn instance(&self) -> u64 {
        self.instance
    }
}

impl Drop for InstancePermit {
    fn drop(&mut self) {
        self.guard.release(&self.job_id, self.instance);
    }
}
