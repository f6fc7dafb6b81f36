//! SQLite-backed job store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Context, Error, Result,
    store::JobStore,
    types::{Job, RunRecord},
};

/// SQLite-backed persistence for jobs and run history.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    ///
    /// For a pool shared with other crates, use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `sqlite::memory:` is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn load_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM scheduler_jobs")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let data: String = row.get("data");
                serde_json::from_str(&data).map_err(Error::from)
            })
            .collect()
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query(
            "INSERT INTO scheduler_jobs (id, data, updated_at_ms) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at_ms = excluded.updated_at_ms",
        )
        .bind(&job.id)
        .bind(&data)
        .bind(job.updated_at_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(id));
        }
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        let result =
            sqlx::query("UPDATE scheduler_jobs SET data = ?, updated_at_ms = ? WHERE id = ?")
                .bind(&data)
                .bind(job.updated_at_ms as i64)
                .bind(&job.id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(&job.id));
        }
        Ok(())
    }

    async fn append_run(&self, run: &RunRecord) -> Result<()> {
        let status = serde_json::to_string(&run.status)?;
        sqlx::query(
            "INSERT INTO scheduler_runs
                (job_id, scheduled_for_ms, started_at_ms, finished_at_ms, status, error, duration_ms, output)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.job_id)
        .bind(run.scheduled_for_ms as i64)
        .bind(run.started_at_ms as i64)
        .bind(run.finished_at_ms as i64)
        .bind(&status)
        .bind(&run.error)
        .bind(run.duration_ms as i64)
        .bind(&run.output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, scheduled_for_ms, started_at_ms, finished_at_ms, status, error, duration_ms, output
             FROM scheduler_runs
             WHERE job_id = ?
             ORDER BY started_at_ms DESC, id DESC
             LIMIT ?",
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let status_str: String = row.get("status");
            runs.push(RunRecord {
                job_id: row.get("job_id"),
                scheduled_for_ms: row.get::<i64, _>("scheduled_for_ms") as u64,
                started_at_ms: row.get::<i64, _>("started_at_ms") as u64,
                finished_at_ms: row.get::<i64, _>("finished_at_ms") as u64,
                status: serde_json::from_str(&status_str)?,
                error: row.get("error"),
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                output: row.get("output"),
            });
        }
        runs.reverse();
        Ok(runs)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::RunStatus};

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_keeps_one_row() {
        let store = make_store().await;
        store.save_job(&Job::fixture("1")).await.unwrap();

        let mut job = Job::fixture("1");
        job.name = "updated".into();
        store.save_job(&job).await.unwrap();
        store.save_job(&Job::fixture("2")).await.unwrap();

        let mut jobs = store.load_jobs().await.unwrap();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "updated");
    }

    #[tokio::test]
    async fn delete_and_update_report_missing_jobs() {
        let store = make_store().await;
        store.save_job(&Job::fixture("1")).await.unwrap();
        store.delete_job("1").await.unwrap();

        assert!(store.load_jobs().await.unwrap().is_empty());
        assert!(store.delete_job("1").await.unwrap_err().is_not_found());
        assert!(
            store
                .update_job(&Job::fixture("1"))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn runs_are_latest_in_chronological_order() {
        let store = make_store().await;
        for i in 0..5 {
            let mut run = RunRecord::fixture("j1", i * 1000);
            if i == 4 {
                run.status = RunStatus::Skipped;
            }
            store.append_run(&run).await.unwrap();
        }

        let runs = store.get_runs("j1", 3).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].started_at_ms, 2000);
        assert_eq!(runs[2].started_at_ms, 4000);
        assert_eq!(runs[2].status, RunStatus::Skipped);
        assert!(store.get_runs("none", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            let mut job = Job::fixture("persisted");
            job.state.next_run_at_ms = Some(42);
            store.save_job(&job).await.unwrap();
        }

        let store = SqliteStore::new(&url).await.unwrap();
        let jobs = store.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].state.next_run_at_ms, Some(42));
    }
}
