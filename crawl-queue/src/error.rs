//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Crawl {job_id} failed: {reason}")]
    CrawlExecutionFailed { job_id: String, reason: String },

    #[error("Publishing {key} failed: {reason}")]
    PublishFailed { key: String, reason: String },

    #[error("Job {job_id} cancelled: {reason}")]
    JobCancelled { job_id: String, reason: String },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn crawl_failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CrawlExecutionFailed {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    pub fn publish_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error means the record store could not be reached or queried.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::DatabaseSqlx(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_failed_message() {
        let err = Error::crawl_failed("abc", "exited with code 1");
        assert_eq!(err.to_string(), "Crawl abc failed: exited with code 1");
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_io_path_message() {
        let err = Error::io_path(
            "creating directory",
            Path::new("/tmp/x"),
            std::io::Error::other("boom"),
        );
        assert!(err.to_string().contains("creating directory /tmp/x"));
    }

    #[test]
    fn test_store_unavailable() {
        let err = Error::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_store_unavailable());
    }
}
