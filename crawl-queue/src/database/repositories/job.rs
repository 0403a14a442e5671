//! Crawl job repository.
//!
//! Every status change is a predicate-guarded `UPDATE ... WHERE status = ?`,
//! so a write never clobbers a transition made by someone else.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::{CrawlJobDbModel, JobCounts, StatusPatch};
use crate::database::time::now_ms;
use crate::database::{WritePool, begin_immediate};
use crate::domain::{CrawlJob, JobStatus};
use crate::{Error, Result};

/// Crawl job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: &CrawlJob) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<CrawlJob>;
    /// All jobs, oldest first.
    async fn list_jobs(&self) -> Result<Vec<CrawlJob>>;
    /// Jobs with `status`, oldest first.
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<CrawlJob>>;
    /// Most recent jobs first, optionally filtered by status.
    async fn list_recent_jobs(&self, status: Option<JobStatus>, limit: u32)
    -> Result<Vec<CrawlJob>>;
    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64>;
    async fn get_job_counts(&self) -> Result<JobCounts>;

    /// Apply `patch` to job `id` only if its status is still `expected`.
    ///
    /// Returns `false` when the predicate did not match (the job moved on or
    /// does not exist). Transitions the lifecycle forbids are rejected before
    /// touching the store.
    async fn update_status_where(
        &self,
        id: &str,
        expected: JobStatus,
        patch: StatusPatch,
    ) -> Result<bool>;

    /// Atomically move up to `limit` pending jobs to `working`, oldest first,
    /// never letting the number of `working` jobs exceed `max_working`.
    async fn claim_pending_jobs(&self, limit: u32, max_working: u32) -> Result<Vec<CrawlJob>>;

    /// Move `working` jobs started before `started_before_ms` to `failed`.
    async fn fail_stale_working_jobs(&self, started_before_ms: i64) -> Result<u64>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
    write_pool: WritePool,
}

impl SqlxJobRepository {
    /// `pool` serves reads; `write_pool` should be the single-connection write pool.
    pub fn new(pool: SqlitePool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }

    fn into_jobs(rows: Vec<CrawlJobDbModel>) -> Result<Vec<CrawlJob>> {
        rows.into_iter().map(CrawlJob::try_from).collect()
    }
}

async fn claim_in_tx(
    conn: &mut SqliteConnection,
    limit: u32,
    max_working: u32,
) -> Result<Vec<CrawlJobDbModel>> {
    let working: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crawl_jobs WHERE status = ?")
        .bind(JobStatus::Working.as_str())
        .fetch_one(&mut *conn)
        .await?;

    let free_slots = i64::from(max_working) - working;
    let take = free_slots.min(i64::from(limit));
    if take <= 0 {
        return Ok(Vec::new());
    }

    let candidates = sqlx::query_as::<_, CrawlJobDbModel>(
        "SELECT * FROM crawl_jobs WHERE status = ? ORDER BY created_at, id LIMIT ?",
    )
    .bind(JobStatus::Pending.as_str())
    .bind(take)
    .fetch_all(&mut *conn)
    .await?;

    let started_at = now_ms();
    let mut claimed = Vec::with_capacity(candidates.len());
    for mut row in candidates {
        let result = sqlx::query(
            "UPDATE crawl_jobs SET status = ?, started_at = ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Working.as_str())
        .bind(started_at)
        .bind(&row.id)
        .bind(JobStatus::Pending.as_str())
        .execute(&mut *conn)
        .await?;

        // Losing the predicate is not an error; the job just stays out of this batch.
        if result.rows_affected() == 1 {
            row.status = JobStatus::Working.as_str().to_string();
            row.started_at = Some(started_at);
            claimed.push(row);
        }
    }

    Ok(claimed)
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(&self, job: &CrawlJob) -> Result<()> {
        let row = CrawlJobDbModel::try_from(job)?;
        sqlx::query(
            r#"
            INSERT INTO crawl_jobs (id, urls, status, created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.urls)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.started_at)
        .bind(row.completed_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<CrawlJob> {
        sqlx::query_as::<_, CrawlJobDbModel>("SELECT * FROM crawl_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("CrawlJob", id))?
            .try_into()
    }

    async fn list_jobs(&self) -> Result<Vec<CrawlJob>> {
        let rows = sqlx::query_as::<_, CrawlJobDbModel>(
            "SELECT * FROM crawl_jobs ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Self::into_jobs(rows)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<CrawlJob>> {
        let rows = sqlx::query_as::<_, CrawlJobDbModel>(
            "SELECT * FROM crawl_jobs WHERE status = ? ORDER BY created_at, id",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Self::into_jobs(rows)
    }

    async fn list_recent_jobs(
        &self,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<CrawlJob>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, CrawlJobDbModel>(
                    "SELECT * FROM crawl_jobs WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, CrawlJobDbModel>(
                    "SELECT * FROM crawl_jobs ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Self::into_jobs(rows)
    }

    async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM crawl_jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn get_job_counts(&self) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM crawl_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            if let Ok(status) = status.parse::<JobStatus>() {
                counts.set(status, count as u64);
            }
        }
        Ok(counts)
    }

    async fn update_status_where(
        &self,
        id: &str,
        expected: JobStatus,
        patch: StatusPatch,
    ) -> Result<bool> {
        if let Some(next) = patch.status {
            expected.ensure_transition(next)?;
        }

        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs SET
                status = COALESCE(?, status),
                started_at = COALESCE(?, started_at),
                completed_at = COALESCE(?, completed_at)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_pending_jobs(&self, limit: u32, max_working: u32) -> Result<Vec<CrawlJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = begin_immediate(&self.write_pool).await?;
        match claim_in_tx(&mut tx, limit, max_working).await {
            Ok(rows) => {
                tx.commit().await?;
                Self::into_jobs(rows)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!("Failed to roll back claim transaction: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn fail_stale_working_jobs(&self, started_before_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE crawl_jobs SET status = ? WHERE status = ? AND started_at < ?",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(JobStatus::Working.as_str())
        .bind(started_before_ms)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected())
    }
}
