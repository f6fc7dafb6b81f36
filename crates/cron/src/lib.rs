//! Durable job scheduler.
//!
//! Jobs are persisted through a [`store::JobStore`] before they are
//! acknowledged and reference their handler by name in a
//! [`registry::HandlerRegistry`]. Executions run on a bounded worker pool
//! with a per-job instance cap; fires over the cap are skipped, not queued.

pub mod error;
pub mod guard;
pub mod parse;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Context, Error, Result},
    registry::{HandlerRegistry, JobContext, JobHandler, handler_fn},
    service::{FireOutcome, SchedulerOptions, SchedulerService},
};

/// Run database migrations for the scheduler.
///
/// This creates the `scheduler_jobs` and `scheduler_runs` tables. Should be
/// called at application startup when using [`store_sqlite::SqliteStore`]
/// on a shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
