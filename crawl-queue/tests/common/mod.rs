//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crawl_queue::crawler::{ArchiveRunner, CrawlOutput, CrawlPaths};
use crawl_queue::database::repositories::{JobRepository, SqlxJobRepository};
use crawl_queue::database::{init_pool, init_write_pool, run_migrations};
use crawl_queue::domain::{CrawlJob, JobStatus};
use crawl_queue::utils::fs;
use crawl_queue::{Error, Result};

pub fn db_url(dir: &Path) -> String {
    let db_path = dir.join("crawls.db");
    format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    )
}

/// Repository over a fresh migrated database inside `dir`.
pub async fn repository_in(dir: &Path) -> Arc<SqlxJobRepository> {
    let url = db_url(dir);
    let pool = init_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let write_pool = init_write_pool(&url).await.unwrap();
    Arc::new(SqlxJobRepository::new(pool, write_pool))
}

pub async fn setup() -> (TempDir, Arc<SqlxJobRepository>) {
    let dir = TempDir::new().unwrap();
    let repo = repository_in(dir.path()).await;
    (dir, repo)
}

/// Insert `n` pending jobs with strictly increasing `created_at`.
pub async fn seed_pending(repo: &dyn JobRepository, n: usize) -> Vec<CrawlJob> {
    let base = chrono::Utc::now() - chrono::Duration::hours(1);
    let mut jobs = Vec::with_capacity(n);
    for i in 0..n {
        let mut job = CrawlJob::new(vec![format!("https://a.test/{}", i)]).unwrap();
        job.created_at = base + chrono::Duration::seconds(i as i64);
        repo.create_job(&job).await.unwrap();
        jobs.push(job);
    }
    jobs
}

pub async fn wait_for_status(repo: &dyn JobRepository, id: &str, status: JobStatus) -> CrawlJob {
    for _ in 0..400 {
        let job = repo.get_job(id).await.unwrap();
        if job.status == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} never reached {}", id, status);
}

/// Runner that writes a fake collection instead of starting a crawler.
pub struct FakeRunner {
    pub crawls_dir: PathBuf,
    pub delay: Duration,
    pub fail: bool,
}

impl FakeRunner {
    pub fn succeeding(crawls_dir: impl Into<PathBuf>) -> Self {
        Self {
            crawls_dir: crawls_dir.into(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ArchiveRunner for FakeRunner {
    async fn run(&self, job: &CrawlJob, token: &CancellationToken) -> Result<CrawlOutput> {
        tokio::select! {
            _ = token.cancelled() => {
                return Err(Error::JobCancelled {
                    job_id: job.id.clone(),
                    reason: "crawl cancelled".to_string(),
                });
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        if self.fail {
            return Err(Error::crawl_failed(&job.id, "crawler exited with code 1"));
        }

        let paths = CrawlPaths::new(&self.crawls_dir, &job.id);
        fs::write_string(&paths.url_file(), &job.urls.join("\n")).await?;
        fs::write_string(&paths.archive_file(), "wacz").await?;
        fs::write_string(&paths.output_dir().join("pages/pages.jsonl"), "{}").await?;
        Ok(CrawlOutput::from(&paths))
    }
}
