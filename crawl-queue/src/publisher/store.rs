//! Object storage backends.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::tokio_command;
use tracing::{debug, error, info};

use crate::utils::fs;
use crate::{Error, Result};

/// Key prefix under which every job's files are stored.
pub const KEY_PREFIX: &str = "crawls";

/// Destination for published crawl files.
///
/// `put_file` must overwrite an existing object under the same key, so a
/// publish can be retried after a partial failure.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Uploads through `rclone copyto` to `<remote>:<bucket>/crawls/<key>`.
pub struct RcloneBlobStore {
    rclone_path: String,
    remote: String,
    bucket: String,
    config_path: Option<String>,
    max_retries: u32,
}

impl RcloneBlobStore {
    pub fn new(
        rclone_path: impl Into<String>,
        remote: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            rclone_path: rclone_path.into(),
            remote: remote.into(),
            bucket: bucket.into(),
            config_path: None,
            max_retries: 3,
        }
    }

    pub fn with_config_path(mut self, config_path: Option<String>) -> Self {
        self.config_path = config_path;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn destination(&self, key: &str) -> String {
        format!("{}:{}/{}/{}", self.remote, self.bucket, KEY_PREFIX, key)
    }
}

#[async_trait]
impl BlobStore for RcloneBlobStore {
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<()> {
        let destination = self.destination(key);
        debug!("Rclone copyto: {} -> {}", local_path.display(), destination);

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                info!("Retry attempt {} for upload of {}", attempt + 1, key);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }

            let mut cmd = tokio_command(&self.rclone_path);
            if let Some(cfg) = &self.config_path {
                cmd.arg("--config").arg(cfg);
            }
            cmd.args(["--log-level", "ERROR", "copyto"])
                .arg(local_path)
                .arg(&destination)
                .stdin(Stdio::null());

            let output = match cmd.output().await {
                Ok(output) => output,
                Err(e) => {
                    last_error = Some(format!("Failed to execute rclone: {}", e));
                    continue;
                }
            };

            if output.status.success() {
                return Ok(());
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            last_error = Some(format!(
                "rclone failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.lines().last().unwrap_or("Unknown error").trim()
            ));
        }

        error!("Upload of {} failed after {} attempts", key, self.max_retries);
        Err(Error::publish_failed(
            key,
            last_error.unwrap_or_else(|| "rclone failed".to_string()),
        ))
    }

    fn describe(&self) -> String {
        format!("{}:{}/{}", self.remote, self.bucket, KEY_PREFIX)
    }
}

/// Copies files into a local mirror directory (`<root>/crawls/<key>`).
///
/// Useful when the bucket is mounted into the filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.join(KEY_PREFIX);
        path.extend(key.split('/'));
        path
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<()> {
        let target = self.object_path(key);
        fs::ensure_parent_dir(&target)
            .await
            .map_err(|e| Error::publish_failed(key, e.to_string()))?;
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| Error::publish_failed(key, e.to_string()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.root.join(KEY_PREFIX).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rclone_destination() {
        let store = RcloneBlobStore::new("rclone", "s3", "archives");
        assert_eq!(
            store.destination("abc/abc.wacz"),
            "s3:archives/crawls/abc/abc.wacz"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rclone_success() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.wacz");
        tokio::fs::write(&file, b"wacz").await.unwrap();

        let store = RcloneBlobStore::new("true", "s3", "archives");
        store.put_file("job/a.wacz", &file).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rclone_failure_is_publish_failed() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.wacz");
        tokio::fs::write(&file, b"wacz").await.unwrap();

        let store = RcloneBlobStore::new("false", "s3", "archives").with_max_retries(1);
        let err = store.put_file("job/a.wacz", &file).await.unwrap_err();
        assert!(matches!(err, Error::PublishFailed { ref key, .. } if key == "job/a.wacz"));
    }

    #[tokio::test]
    async fn test_fs_store_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("bucket"));
        let file = dir.path().join("a.txt");

        tokio::fs::write(&file, b"first").await.unwrap();
        store.put_file("job/nested/a.txt", &file).await.unwrap();
        tokio::fs::write(&file, b"second").await.unwrap();
        store.put_file("job/nested/a.txt", &file).await.unwrap();

        let stored = store.object_path("job/nested/a.txt");
        assert_eq!(stored, dir.path().join("bucket/crawls/job/nested/a.txt"));
        assert_eq!(tokio::fs::read(&stored).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_fs_store_missing_source() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store
            .put_file("job/a.txt", &dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PublishFailed { .. }));
    }
}
