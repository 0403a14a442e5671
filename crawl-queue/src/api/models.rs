//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::JobCounts;
use crate::domain::{CrawlJob, JobStatus};
use crate::publisher::PublishConfig;

/// Default page size for the recent-jobs endpoint.
pub const DEFAULT_RECENT_LIMIT: u32 = 20;

/// Upper bound for the recent-jobs endpoint.
pub const MAX_RECENT_LIMIT: u32 = 100;

/// Request body for creating a crawl.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateCrawlRequest {
    pub urls: Vec<String>,
}

/// Crawl job as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJobResponse {
    pub id: String,
    pub urls: Vec<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Public archive URL; only for completed jobs when publishing is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,
}

impl CrawlJobResponse {
    pub fn from_job(job: CrawlJob, publish: Option<&PublishConfig>) -> Self {
        let archive_url = match (job.status, publish) {
            (JobStatus::Completed, Some(config)) => Some(config.archive_url(&job.id)),
            _ => None,
        };

        Self {
            id: job.id,
            urls: job.urls,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            archive_url,
        }
    }
}

/// Query parameters for `GET /api/crawls/recent`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentJobsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl RecentJobsQuery {
    /// Clamp the requested page size into `1..=MAX_RECENT_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_RECENT_LIMIT)
            .clamp(1, MAX_RECENT_LIMIT)
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<JobCounts>,
}

/// Current log filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
}

/// Request body for changing the log filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}
