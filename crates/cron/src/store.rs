//! Persistence trait for job definitions and run history.

use async_trait::async_trait;

use crate::{
    Result,
    types::{Job, RunRecord},
};

/// Durable backend for jobs.
///
/// `delete_job` and `update_job` fail with
/// [`Error::JobNotFound`](crate::Error::JobNotFound) for unknown ids.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<Job>>;
    async fn save_job(&self, job: &Job) -> Result<()>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    async fn update_job(&self, job: &Job) -> Result<()>;
    async fn append_run(&self, run: &RunRecord) -> Result<()>;
    /// Most recent `limit` runs, oldest first.
    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>>;
}
