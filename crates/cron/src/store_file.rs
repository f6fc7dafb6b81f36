//! JSON file-backed job store with atomic writes.

use std::path::PathBuf;

use {
    async_trait::async_trait,
    tokio::{fs, io::AsyncWriteExt, sync::Mutex},
};

use crate::{
    Context, Error, Result,
    store::JobStore,
    types::{Job, RunRecord},
};

/// File-backed store: all jobs in one JSON file, runs as JSONL per job.
pub struct FileStore {
    jobs_path: PathBuf,
    runs_dir: PathBuf,
    /// Serializes read-modify-write cycles on the jobs file.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(jobs_path: PathBuf, runs_dir: PathBuf) -> Self {
        Self {
            jobs_path,
            runs_dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Jobs in `jobs_path`, run history in a `runs/` directory next to it.
    pub fn at(jobs_path: PathBuf) -> Self {
        let runs_dir = jobs_path
            .parent()
            .map(|dir| dir.join("runs"))
            .unwrap_or_else(|| PathBuf::from("runs"));
        Self::new(jobs_path, runs_dir)
    }

    async fn ensure_dirs(&self) -> Result<()> {
        if let Some(parent) = self.jobs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::create_dir_all(&self.runs_dir).await?;
        Ok(())
    }

    async fn read_jobs(&self) -> Result<Vec<Job>> {
        if !fs::try_exists(&self.jobs_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.jobs_path).await?;
        serde_json::from_str(&data).context("failed to parse jobs file")
    }

    /// Write to a temp file, keep the previous file as `.bak`, rename over.
    async fn write_jobs(&self, jobs: &[Job]) -> Result<()> {
        self.ensure_dirs().await?;
        let json = serde_json::to_string_pretty(jobs)?;
        let tmp = self.jobs_path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(&self.jobs_path).await.unwrap_or(false) {
            fs::copy(&self.jobs_path, self.jobs_path.with_extension("json.bak")).await?;
        }

        fs::rename(&tmp, &self.jobs_path).await?;
        Ok(())
    }

    fn runs_path(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.runs_dir.join(format!("{safe}.jsonl"))
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn load_jobs(&self) -> Result<Vec<Job>> {
        self.read_jobs().await
    }

    async fn save_job(&self, job: &Job) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut jobs = self.read_jobs().await?;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        self.write_jobs(&jobs).await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut jobs = self.read_jobs().await?;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(Error::job_not_found(id));
        }
        self.write_jobs(&jobs).await
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let _lock = self.write_lock.lock().await;
        let mut jobs = self.read_jobs().await?;
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| Error::job_not_found(&job.id))?;
        *existing = job.clone();
        self.write_jobs(&jobs).await
    }

    async fn append_run(&self, run: &RunRecord) -> Result<()> {
        self.ensure_dirs().await?;
        let mut line = serde_json::to_string(run)?;
        line.push('\n');
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.runs_path(&run.job_id))
            .await?
            .write_all(line.as_bytes())
            .await?;
        Ok(())
    }

    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let path = self.runs_path(job_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path).await?;
        let all: Vec<RunRecord> = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc, tempfile::TempDir};

    fn make_store(tmp: &TempDir) -> FileStore {
        FileStore::at(tmp.path().join("jobs.json"))
    }

    #[tokio::test]
    async fn empty_until_first_save() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(&tmp);
        assert!(store.load_jobs().await.unwrap().is_empty());

        store.save_job(&Job::fixture("1")).await.unwrap();
        store.save_job(&Job::fixture("2")).await.unwrap();
        assert_eq!(store.load_jobs().await.unwrap().len(), 2);
        assert!(tmp.path().join("jobs.json.bak").exists());
    }

    #[tokio::test]
    async fn save_replaces_and_update_requires_existing() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(&tmp);

        store.save_job(&Job::fixture("1")).await.unwrap();
        let mut job = Job::fixture("1");
        job.name = "replaced".into();
        store.save_job(&job).await.unwrap();

        let jobs = store.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "replaced");

        assert!(
            store
                .update_job(&Job::fixture("ghost"))
                .await
                .unwrap_err()
                .is_not_found()
        );
        store.delete_job("1").await.unwrap();
        assert!(store.delete_job("1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn concurrent_saves_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(make_store(&tmp));

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.save_job(&Job::fixture(&i.to_string())).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(store.load_jobs().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn runs_append_as_jsonl() {
        let tmp = TempDir::new().unwrap();
        let store = make_store(&tmp);

        for i in 0..3 {
            store.append_run(&RunRecord::fixture("j/1", i * 10)).await.unwrap();
        }

        let runs = store.get_runs("j/1", 2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].started_at_ms, 10);
        assert!(tmp.path().join("runs").join("j_1.jsonl").exists());
    }
}
