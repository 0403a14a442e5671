//! Result publisher: uploads crawl output to object storage, then removes
//! the local working directory.
//!
//! Local files are deleted only after every upload has succeeded. Without a
//! configured store, publishing is a no-op and the output stays on disk.

pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use crate::crawler::CrawlOutput;
use crate::utils::fs;
use crate::{Error, Result};

pub use store::{BlobStore, FsBlobStore, KEY_PREFIX, RcloneBlobStore};

/// Uploads in flight per job.
const UPLOAD_CONCURRENCY: usize = 4;

/// Object storage destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    pub bucket: String,
    /// S3 endpoint, e.g. `https://s3.example.com`. Only used for public URLs.
    pub endpoint: Option<String>,
    /// Overrides the derived public base URL.
    pub public_base_url: Option<String>,
    pub rclone_remote: String,
    pub rclone_path: String,
    pub rclone_config: Option<String>,
    /// Copy into this directory instead of running rclone.
    pub mirror_dir: Option<PathBuf>,
}

impl PublishConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: None,
            public_base_url: None,
            rclone_remote: "s3".to_string(),
            rclone_path: "rclone".to_string(),
            rclone_config: None,
            mirror_dir: None,
        }
    }

    /// Base URL under which `crawls/<key>` objects are publicly readable.
    pub fn public_base(&self) -> String {
        if let Some(base) = &self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }

        let host = self
            .endpoint
            .as_deref()
            .map(|e| {
                e.trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
            })
            .filter(|h| !h.is_empty())
            .unwrap_or("s3.amazonaws.com");
        format!("https://{}.{}", self.bucket, host)
    }

    /// Public URL of a job's combined WACZ archive.
    pub fn archive_url(&self, job_id: &str) -> String {
        format!("{}/{}/{}/{}.wacz", self.public_base(), KEY_PREFIX, job_id, job_id)
    }

    pub fn build_store(&self) -> Arc<dyn BlobStore> {
        match &self.mirror_dir {
            Some(dir) => Arc::new(FsBlobStore::new(dir.clone())),
            None => Arc::new(
                RcloneBlobStore::new(&self.rclone_path, &self.rclone_remote, &self.bucket)
                    .with_config_path(self.rclone_config.clone()),
            ),
        }
    }
}

/// What a publish call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No store configured; local output kept.
    Skipped,
    /// All files uploaded and the working directory removed.
    Uploaded { files: usize },
}

pub struct ResultPublisher {
    store: Option<Arc<dyn BlobStore>>,
}

impl ResultPublisher {
    pub fn new(store: Option<Arc<dyn BlobStore>>) -> Self {
        Self { store }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn from_config(config: Option<&PublishConfig>) -> Self {
        Self::new(config.map(PublishConfig::build_store))
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Upload every file under `output.output_dir` as `<job_id>/<relative path>`,
    /// then delete `output.work_dir`.
    ///
    /// On any upload failure the local files are left in place and
    /// `PublishFailed` is returned.
    pub async fn publish(&self, job_id: &str, output: &CrawlOutput) -> Result<PublishOutcome> {
        let Some(store) = &self.store else {
            debug!(job_id = %job_id, "No object store configured, keeping local output");
            return Ok(PublishOutcome::Skipped);
        };

        let files = collect_files(job_id, &output.output_dir).await?;
        let count = files.len();
        if count == 0 {
            warn!(job_id = %job_id, dir = %output.output_dir.display(), "Crawl produced no files");
        }

        info!(job_id = %job_id, files = count, target = %store.describe(), "Publishing crawl output");

        stream::iter(files)
            .map(|(key, path)| {
                let store = Arc::clone(store);
                async move { store.put_file(&key, &path).await }
            })
            .buffer_unordered(UPLOAD_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;

        fs::remove_dir_all(&output.work_dir).await?;
        info!(job_id = %job_id, files = count, "Published crawl output");

        Ok(PublishOutcome::Uploaded { files: count })
    }
}

/// Walk `dir` and pair each file with its object key.
async fn collect_files(job_id: &str, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let job_id = job_id.to_string();
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::publish_failed(&job_id, e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&dir)
                .map_err(|e| Error::publish_failed(&job_id, e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((format!("{}/{}", job_id, key), entry.into_path()));
        }
        Ok(files)
    })
    .await
    .map_err(|e| Error::Other(format!("File listing task failed: {}", e)))?
}
