//! Crawl job database models.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, opt_ms_to_datetime};
use crate::domain::{CrawlJob, JobStatus};
use crate::{Error, Result};

/// Row of the `crawl_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CrawlJobDbModel {
    pub id: String,
    /// JSON array of URLs
    pub urls: String,
    /// Status: pending, working, completed, failed
    pub status: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl TryFrom<CrawlJobDbModel> for CrawlJob {
    type Error = Error;

    fn try_from(row: CrawlJobDbModel) -> Result<Self> {
        let status = JobStatus::from_str(&row.status).map_err(|_| {
            Error::Other(format!(
                "Unknown status '{}' stored for job {}",
                row.status, row.id
            ))
        })?;

        Ok(CrawlJob {
            urls: serde_json::from_str(&row.urls)?,
            status,
            created_at: ms_to_datetime(row.created_at),
            started_at: opt_ms_to_datetime(row.started_at),
            completed_at: opt_ms_to_datetime(row.completed_at),
            id: row.id,
        })
    }
}

impl TryFrom<&CrawlJob> for CrawlJobDbModel {
    type Error = Error;

    fn try_from(job: &CrawlJob) -> Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            urls: serde_json::to_string(&job.urls)?,
            status: job.status.as_str().to_string(),
            created_at: datetime_to_ms(job.created_at),
            started_at: job.started_at.map(datetime_to_ms),
            completed_at: job.completed_at.map(datetime_to_ms),
        })
    }
}

/// Timestamp columns written together with a status change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: Option<JobStatus>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl StatusPatch {
    pub fn working(now_ms: i64) -> Self {
        Self {
            status: Some(JobStatus::Working),
            started_at: Some(now_ms),
            completed_at: None,
        }
    }

    pub fn completed(now_ms: i64) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            started_at: None,
            completed_at: Some(now_ms),
        }
    }

    /// `completed_at` stays unset for failed jobs.
    pub fn failed() -> Self {
        Self {
            status: Some(JobStatus::Failed),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub working: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.working + self.completed + self.failed
    }

    pub fn set(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Working => self.working = count,
            JobStatus::Completed => self.completed = count,
            JobStatus::Failed => self.failed = count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_model_conversion() {
        let job = CrawlJob::new(vec![
            "https://a.test/x".to_string(),
            "https://b.test/y".to_string(),
        ])
        .unwrap();
        let row = CrawlJobDbModel::try_from(&job).unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.urls, r#"["https://a.test/x","https://b.test/y"]"#);

        let back = CrawlJob::try_from(row).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.urls, job.urls);
        assert_eq!(back.status, JobStatus::Pending);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let row = CrawlJobDbModel {
            id: "x".into(),
            urls: "[]".into(),
            status: "PROCESSING".into(),
            created_at: 0,
            started_at: None,
            completed_at: None,
        };
        assert!(CrawlJob::try_from(row).is_err());
    }

    #[test]
    fn test_failed_patch_has_no_completion_time() {
        let patch = StatusPatch::failed();
        assert_eq!(patch.status, Some(JobStatus::Failed));
        assert!(patch.completed_at.is_none());
    }

    #[test]
    fn test_counts_total() {
        let mut counts = JobCounts::default();
        counts.set(JobStatus::Pending, 3);
        counts.set(JobStatus::Working, 2);
        assert_eq!(counts.total(), 5);
    }
}
