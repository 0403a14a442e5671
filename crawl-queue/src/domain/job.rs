//! Crawl job entity and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Job status values.
///
/// Transitions are forward-only: `pending → working → {completed | failed}`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, waiting for a free slot.
    Pending,
    /// Claimed by the scheduler; a crawl is running.
    Working,
    /// Crawl and publish finished.
    Completed,
    /// Crawl, publish or supervision failed.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Working)
                | (Self::Working, Self::Completed)
                | (Self::Working, Self::Failed)
        )
    }

    /// Validate a transition, returning `InvalidStateTransition` otherwise.
    pub fn ensure_transition(&self, next: JobStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn all() -> [JobStatus; 4] {
        [Self::Pending, Self::Working, Self::Completed, Self::Failed]
    }
}

/// One unit of archiving work covering one or more URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJob {
    pub id: String,
    pub urls: Vec<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    /// Create a new `pending` job with a generated id.
    ///
    /// The URL list is validated first; see [`validate_urls`].
    pub fn new(urls: Vec<String>) -> Result<Self> {
        validate_urls(&urls)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            urls,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }
}

/// Reject empty URL lists and anything that is not an absolute http(s) URL.
pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Err(Error::validation("urls must contain at least one URL"));
    }

    for raw in urls {
        let parsed = url::Url::parse(raw)
            .map_err(|e| Error::validation(format!("Invalid URL '{}': {}", raw, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "Unsupported URL scheme '{}' in '{}'",
                parsed.scheme(),
                raw
            )));
        }
    }

    Ok(())
}
