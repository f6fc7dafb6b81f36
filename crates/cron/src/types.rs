//! Core data types for the job scheduler.

use serde::{Deserialize, Serialize};

/// When a job fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Trigger {
    /// One-shot: fire once at `at_ms` (epoch millis).
    At { at_ms: u64 },
    /// Fixed interval: fire every `every_ms` millis, anchored at `anchor_ms`.
    ///
    /// A missing anchor is filled with the creation time when the job is
    /// scheduled, so fire times stay stable across restarts.
    Every {
        every_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<u64>,
    },
    /// Cron expression (5-field standard or 6/7-field with seconds/year).
    Cron {
        expr: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl Trigger {
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::At { .. })
    }
}

/// Outcome of a single fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Ok,
    Error,
    /// The fire was dropped: instance cap reached or past its grace time.
    Skipped,
}

/// Where a job is in its lifecycle. Cancelled jobs and one-shots that have
/// run no longer exist, so their terminal state is `JobNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Waiting for its next fire time.
    Scheduled,
    /// Fire time reached, not yet dispatched.
    Due,
    /// At least one instance executing.
    Running(usize),
}

/// Mutable runtime state of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub skip_count: u64,
}

/// A persisted job definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Name under which the handler is registered in the
    /// [`HandlerRegistry`](crate::registry::HandlerRegistry).
    pub handler: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub args: serde_json::Value,
    pub trigger: Trigger,
    pub max_instances: usize,
    #[serde(default)]
    pub coalesce: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misfire_grace_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub state: JobState,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Record of one fire, stored in run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub job_id: String,
    /// The fire time this run was dispatched for.
    pub scheduled_for_ms: u64,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Input for scheduling a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    /// Caller-chosen id; a UUID is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub handler: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub trigger: Trigger,
    /// Falls back to the scheduler default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<usize>,
    /// Falls back to the scheduler default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coalesce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misfire_grace_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl JobCreate {
    /// Minimal definition with scheduler defaults for everything else.
    pub fn new(name: impl Into<String>, handler: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: None,
            name: name.into(),
            handler: handler.into(),
            args: serde_json::Value::Null,
            trigger,
            max_instances: None,
            coalesce: None,
            misfire_grace_ms: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self
    }

    #[must_use]
    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = Some(coalesce);
        self
    }
}

fn default_true() -> bool {
    true
}

/// Patch for updating an existing job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coalesce: Option<bool>,
}

/// Summary status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_count: usize,
    pub enabled_count: usize,
    pub running_instances: usize,
    pub next_run_at_ms: Option<u64>,
}

#[cfg(test)]
impl Job {
    /// A one-shot job far in the future, for store tests.
    pub(crate) fn fixture(id: &str) -> Self {
        Self {
            id: id.into(),
            name: format!("job-{id}"),
            handler: "noop".into(),
            args: serde_json::Value::Null,
            trigger: Trigger::At {
                at_ms: 9_999_999_999_999,
            },
            max_instances: 1,
            coalesce: false,
            misfire_grace_ms: None,
            enabled: true,
            state: JobState::default(),
            created_at_ms: 1000,
            updated_at_ms: 1000,
        }
    }
}

#[cfg(test)]
impl RunRecord {
    pub(crate) fn fixture(job_id: &str, started_at_ms: u64) -> Self {
        Self {
            job_id: job_id.into(),
            scheduled_for_ms: started_at_ms,
            started_at_ms,
            finished_at_ms: started_at_ms + 500,
            status: RunStatus::Ok,
            error: None,
            duration_ms: 500,
            output: None,
        }
    }
}
