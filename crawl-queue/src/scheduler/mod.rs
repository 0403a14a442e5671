//! Scheduler loop.
//!
//! One long-lived loop claims pending jobs under a global cap and dispatches a
//! supervised task per claimed job. The in-flight count is read from the
//! record store on every iteration; nothing is counted in memory.
//!
//! ```text
//! ┌────────────┐ count working ┌────────────┐ claim (BEGIN IMMEDIATE) ┌──────────┐
//! │ loop tick  │──────────────▶│ free slots │────────────────────────▶│ dispatch │
//! └────────────┘               └────────────┘                         └────┬─────┘
//!       ▲  sleep poll / backoff                                            │ spawn
//!       └──────────────────────────────────────────────────────────────────┤
//!                                        runner ─▶ publisher ─▶ completed / failed
//! ```

pub mod registry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crawler::ArchiveRunner;
use crate::database::models::StatusPatch;
use crate::database::repositories::JobRepository;
use crate::database::retry::retry_on_store_error;
use crate::database::time::now_ms;
use crate::domain::{CrawlJob, JobStatus};
use crate::publisher::{PublishOutcome, ResultPublisher};
use crate::{Error, Result};

pub use registry::TaskRegistry;

/// How long shutdown waits for in-flight jobs to record a terminal status.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Scheduler loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Global cap on `working` jobs.
    pub max_concurrent: u32,
    /// Sleep between iterations.
    pub poll_interval: Duration,
    /// Sleep when no slot is free.
    pub backoff_interval: Duration,
    /// Optional per-job deadline.
    pub job_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            poll_interval: Duration::from_secs(3),
            backoff_interval: Duration::from_secs(5),
            job_timeout: None,
        }
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every slot is taken; pending work was not queried.
    AtCapacity { working: u64 },
    /// Slots were free but nothing was pending.
    Idle,
    /// This many jobs were claimed and dispatched.
    Dispatched(usize),
}

/// Collaborators handed to each per-job task.
#[derive(Clone)]
struct JobContext {
    repository: Arc<dyn JobRepository>,
    runner: Arc<dyn ArchiveRunner>,
    publisher: Arc<ResultPublisher>,
    registry: Arc<TaskRegistry>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    ctx: JobContext,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        repository: Arc<dyn JobRepository>,
        runner: Arc<dyn ArchiveRunner>,
        publisher: Arc<ResultPublisher>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            ctx: JobContext {
                repository,
                runner,
                publisher,
                registry: Arc::new(TaskRegistry::new()),
            },
            cancellation_token,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.ctx.registry
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Fail `working` jobs started more than `older_than` ago.
    ///
    /// Meant for startup, before the loop runs, to settle jobs orphaned by a
    /// previous process. They go to `failed`, never back to `pending`.
    pub async fn reconcile_orphans(&self, older_than: Duration) -> Result<u64> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as i64);
        let failed = self.ctx.repository.fail_stale_working_jobs(cutoff).await?;
        if failed > 0 {
            warn!(count = failed, "Marked orphaned working jobs as failed");
        }
        Ok(failed)
    }

    /// Run one iteration: enforce deadlines, count, claim, dispatch.
    pub async fn tick(&self) -> Result<TickOutcome> {
        for job_id in self.ctx.registry.cancel_expired(Instant::now()) {
            warn!(job_id = %job_id, "Job exceeded its deadline, cancelling");
        }

        let max = u64::from(self.config.max_concurrent);
        let working = self
            .ctx
            .repository
            .count_jobs_by_status(JobStatus::Working)
            .await?;
        if working >= max {
            debug!(working, max, "At capacity");
            return Ok(TickOutcome::AtCapacity { working });
        }

        let free = (max - working) as u32;
        let jobs = self
            .ctx
            .repository
            .claim_pending_jobs(free, self.config.max_concurrent)
            .await?;
        if jobs.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let count = jobs.len();
        info!(count, working, "Claimed pending jobs");
        for job in jobs {
            self.dispatch(job);
        }
        Ok(TickOutcome::Dispatched(count))
    }

    fn dispatch(&self, job: CrawlJob) {
        let token =
            self.ctx
                .registry
                .register(&job.id, &self.cancellation_token, self.config.job_timeout);
        tokio::spawn(supervise(self.ctx.clone(), job, token));
    }

    /// Loop until the cancellation token fires, then wait for in-flight jobs
    /// to settle.
    pub async fn run(&self) {
        info!(
            max_concurrent = self.config.max_concurrent,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Scheduler started"
        );

        while !self.cancellation_token.is_cancelled() {
            let pause = match self.tick().await {
                Ok(TickOutcome::AtCapacity { .. }) => self.config.backoff_interval,
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    error!("Scheduler iteration failed: {}", e);
                    self.config.poll_interval
                }
            };

            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.shutdown(SHUTDOWN_GRACE).await;
        info!("Scheduler stopped");
    }

    /// Cancel every in-flight job and wait up to `grace` for their terminal
    /// status updates. Returns `true` if all of them settled.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let registry = &self.ctx.registry;
        let count = registry.cancel_all();
        if count == 0 {
            return true;
        }

        info!(count, "Cancelling in-flight jobs");
        let start = Instant::now();
        while !registry.is_empty() && start.elapsed() < grace {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = registry.len();
        if remaining > 0 {
            warn!(remaining, "Shutdown grace period elapsed with jobs still in flight");
        }
        remaining == 0
    }
}

/// Per-job body: crawl, then publish. Cancellation stops either step.
async fn run_job(
    runner: Arc<dyn ArchiveRunner>,
    publisher: Arc<ResultPublisher>,
    job: CrawlJob,
    token: CancellationToken,
) -> Result<PublishOutcome> {
    let output = runner.run(&job, &token).await?;

    tokio::select! {
        _ = token.cancelled() => Err(Error::JobCancelled {
            job_id: job.id.clone(),
            reason: "cancelled while publishing".to_string(),
        }),
        res = publisher.publish(&job.id, &output) => res,
    }
}

/// Run the job body in its own task and record the terminal status.
///
/// Any error or panic in the body ends as `failed`.
async fn supervise(ctx: JobContext, job: CrawlJob, token: CancellationToken) {
    let job_id = job.id.clone();
    let body = tokio::spawn(run_job(
        Arc::clone(&ctx.runner),
        Arc::clone(&ctx.publisher),
        job,
        token,
    ));

    let patch = match body.await {
        Ok(Ok(outcome)) => {
            info!(job_id = %job_id, ?outcome, "Job completed");
            StatusPatch::completed(now_ms())
        }
        Ok(Err(e)) => {
            warn!(job_id = %job_id, "Job failed: {}", e);
            StatusPatch::failed()
        }
        Err(e) => {
            error!(job_id = %job_id, "Job task aborted: {}", e);
            StatusPatch::failed()
        }
    };

    let repository = &ctx.repository;
    let result = retry_on_store_error("record job outcome", || {
        repository.update_status_where(&job_id, JobStatus::Working, patch)
    })
    .await;

    match result {
        Ok(true) => {}
        Ok(false) => warn!(job_id = %job_id, "Job was no longer working, outcome not recorded"),
        Err(e) => error!(job_id = %job_id, "Failed to record job outcome: {}", e),
    }

    ctx.registry.remove(&job_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::CrawlOutput;
    use crate::database::repositories::SqlxJobRepository;
    use crate::database::{init_pool, init_write_pool, run_migrations};
    use crate::database::models::JobCounts;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// What the fake runner does for every job.
    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Panic,
        Hang,
    }

    struct FakeRunner {
        root: std::path::PathBuf,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl ArchiveRunner for FakeRunner {
        async fn run(&self, job: &CrawlJob, token: &CancellationToken) -> Result<CrawlOutput> {
            match self.behaviour {
                Behaviour::Succeed => {
                    let work_dir = self.root.join(&job.id);
                    Ok(CrawlOutput {
                        output_dir: work_dir.join("collections").join(&job.id),
                        work_dir,
                    })
                }
                Behaviour::Panic => panic!("runner exploded"),
                Behaviour::Hang => {
                    token.cancelled().await;
                    Err(Error::JobCancelled {
                        job_id: job.id.clone(),
                        reason: "crawl cancelled".to_string(),
                    })
                }
            }
        }
    }

    async fn setup(
        behaviour: Behaviour,
        config: SchedulerConfig,
    ) -> (TempDir, Arc<SqlxJobRepository>, Scheduler) {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("jobs.db").to_string_lossy().replace('\\', "/")
        );
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let write_pool = init_write_pool(&url).await.unwrap();
        let repo = Arc::new(SqlxJobRepository::new(pool, write_pool));

        let runner = Arc::new(FakeRunner {
            root: dir.path().join("crawls"),
            behaviour,
        });
        let scheduler = Scheduler::new(
            config,
            repo.clone(),
            runner,
            Arc::new(ResultPublisher::disabled()),
            CancellationToken::new(),
        );
        (dir, repo, scheduler)
    }

    fn store_down() -> Error {
        Error::DatabaseSqlx(sqlx::Error::PoolTimedOut)
    }

    /// Real repository whose counts and status writes fail a set number of
    /// times before going through.
    struct FlakyRepository {
        inner: Arc<SqlxJobRepository>,
        count_failures: AtomicUsize,
        update_failures: AtomicUsize,
        count_calls: AtomicUsize,
    }

    impl FlakyRepository {
        fn new(inner: Arc<SqlxJobRepository>, count_failures: usize, update_failures: usize) -> Self {
            Self {
                inner,
                count_failures: AtomicUsize::new(count_failures),
                update_failures: AtomicUsize::new(update_failures),
                count_calls: AtomicUsize::new(0),
            }
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl JobRepository for FlakyRepository {
        async fn create_job(&self, job: &CrawlJob) -> Result<()> {
            self.inner.create_job(job).await
        }
        async fn get_job(&self, id: &str) -> Result<CrawlJob> {
            self.inner.get_job(id).await
        }
        async fn list_jobs(&self) -> Result<Vec<CrawlJob>> {
            self.inner.list_jobs().await
        }
        async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<CrawlJob>> {
            self.inner.list_jobs_by_status(status).await
        }
        async fn list_recent_jobs(
            &self,
            status: Option<JobStatus>,
            limit: u32,
        ) -> Result<Vec<CrawlJob>> {
            self.inner.list_recent_jobs(status, limit).await
        }
        async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            if Self::take_failure(&self.count_failures) {
                return Err(store_down());
            }
            self.inner.count_jobs_by_status(status).await
        }
        async fn get_job_counts(&self) -> Result<JobCounts> {
            self.inner.get_job_counts().await
        }
        async fn update_status_where(
            &self,
            id: &str,
            expected: JobStatus,
            patch: StatusPatch,
        ) -> Result<bool> {
            if Self::take_failure(&self.update_failures) {
                return Err(store_down());
            }
            self.inner.update_status_where(id, expected, patch).await
        }
        async fn claim_pending_jobs(&self, limit: u32, max_working: u32) -> Result<Vec<CrawlJob>> {
            self.inner.claim_pending_jobs(limit, max_working).await
        }
        async fn fail_stale_working_jobs(&self, started_before_ms: i64) -> Result<u64> {
            self.inner.fail_stale_working_jobs(started_before_ms).await
        }
    }

    fn scheduler_over(
        repo: Arc<dyn JobRepository>,
        dir: &TempDir,
        config: SchedulerConfig,
    ) -> Scheduler {
        Scheduler::new(
            config,
            repo,
            Arc::new(FakeRunner {
                root: dir.path().join("crawls"),
                behaviour: Behaviour::Succeed,
            }),
            Arc::new(ResultPublisher::disabled()),
            CancellationToken::new(),
        )
    }

    async fn submit(repo: &SqlxJobRepository) -> CrawlJob {
        let job = CrawlJob::new(vec!["https://a.test/x".to_string()]).unwrap();
        repo.create_job(&job).await.unwrap();
        job
    }

    async fn wait_for_status(repo: &SqlxJobRepository, id: &str, status: JobStatus) -> CrawlJob {
        for _ in 0..200 {
            let job = repo.get_job(id).await.unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_idle_tick() {
        let (_dir, _repo, scheduler) = setup(Behaviour::Succeed, SchedulerConfig::default()).await;
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let (_dir, repo, scheduler) = setup(Behaviour::Succeed, SchedulerConfig::default()).await;
        let job = submit(&repo).await;

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Dispatched(1));
        let done = wait_for_status(&repo, &job.id, JobStatus::Completed).await;
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_panicking_job_fails() {
        let (_dir, repo, scheduler) = setup(Behaviour::Panic, SchedulerConfig::default()).await;
        let job = submit(&repo).await;

        scheduler.tick().await.unwrap();
        let failed = wait_for_status(&repo, &job.id, JobStatus::Failed).await;
        assert!(failed.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_at_capacity_skips_claim() {
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..SchedulerConfig::default()
        };
        let (_dir, repo, scheduler) = setup(Behaviour::Hang, config).await;
        submit(&repo).await;
        let second = submit(&repo).await;

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Dispatched(1));
        assert_eq!(
            scheduler.tick().await.unwrap(),
            TickOutcome::AtCapacity { working: 1 }
        );
        assert_eq!(
            repo.get_job(&second.id).await.unwrap().status,
            JobStatus::Pending
        );

        assert!(scheduler.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_deadline_fails_job() {
        let config = SchedulerConfig {
            job_timeout: Some(Duration::from_millis(50)),
            ..SchedulerConfig::default()
        };
        let (_dir, repo, scheduler) = setup(Behaviour::Hang, config).await;
        let job = submit(&repo).await;

        scheduler.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.tick().await.unwrap();

        wait_for_status(&repo, &job.id, JobStatus::Failed).await;
    }

    #[tokio::test]
    async fn test_shutdown_fails_in_flight_jobs() {
        let (_dir, repo, scheduler) = setup(Behaviour::Hang, SchedulerConfig::default()).await;
        let a = submit(&repo).await;
        let b = submit(&repo).await;

        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Dispatched(2));
        assert!(scheduler.shutdown(Duration::from_secs(5)).await);
        assert!(scheduler.registry().is_empty());

        for id in [a.id, b.id] {
            assert_eq!(repo.get_job(&id).await.unwrap().status, JobStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            ..SchedulerConfig::default()
        };
        let (_dir, repo, scheduler) = setup(Behaviour::Succeed, config).await;
        let scheduler = Arc::new(scheduler);
        let job = submit(&repo).await;

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        wait_for_status(&repo, &job.id, JobStatus::Completed).await;
        scheduler.cancellation_token().cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_orphans() {
        let (_dir, repo, scheduler) = setup(Behaviour::Succeed, SchedulerConfig::default()).await;
        let job = submit(&repo).await;
        repo.update_status_where(&job.id, JobStatus::Pending, StatusPatch::working(0))
            .await
            .unwrap();

        assert_eq!(
            scheduler
                .reconcile_orphans(Duration::from_secs(60))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repo.get_job(&job.id).await.unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_run_survives_store_outage() {
        let (dir, repo, _) = setup(Behaviour::Succeed, SchedulerConfig::default()).await;
        let flaky = Arc::new(FlakyRepository::new(repo.clone(), 3, 0));
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(scheduler_over(flaky.clone(), &dir, config));
        let job = submit(&repo).await;

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        wait_for_status(&repo, &job.id, JobStatus::Completed).await;
        assert!(flaky.count_calls.load(Ordering::SeqCst) > 3);

        scheduler.cancellation_token().cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_tick_reports_store_outage() {
        let (dir, repo, _) = setup(Behaviour::Succeed, SchedulerConfig::default()).await;
        let flaky = Arc::new(FlakyRepository::new(repo.clone(), 1, 0));
        let scheduler = scheduler_over(flaky, &dir, SchedulerConfig::default());
        let job = submit(&repo).await;

        assert!(matches!(scheduler.tick().await, Err(Error::DatabaseSqlx(_))));
        assert_eq!(
            repo.get_job(&job.id).await.unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(scheduler.tick().await.unwrap(), TickOutcome::Dispatched(1));
    }

    #[tokio::test]
    async fn test_outcome_write_retries_store_errors() {
        let (dir, repo, _) = setup(Behaviour::Succeed, SchedulerConfig::default()).await;
        let flaky = Arc::new(FlakyRepository::new(repo.clone(), 0, 3));
        let scheduler = scheduler_over(flaky, &dir, SchedulerConfig::default());
        let job = submit(&repo).await;

        scheduler.tick().await.unwrap();
        let done = wait_for_status(&repo, &job.id, JobStatus::Completed).await;
        assert!(done.completed_at.is_some());
        assert!(scheduler.shutdown(Duration::from_secs(5)).await);
    }
}
