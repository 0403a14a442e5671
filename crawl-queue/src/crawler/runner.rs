//! Crawl execution through the browsertrix-crawler container.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ProcessExit, tokio_command, wait_or_cancel};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CrawlPaths, CrawlerConfig};
use crate::domain::CrawlJob;
use crate::utils::fs;
use crate::{Error, Result};

/// Prefix of the docker container name; the job id follows.
pub const CONTAINER_PREFIX: &str = "crawl-queue-";

/// Upper bound on `docker rm -f` after a cancelled crawl.
const CONTAINER_REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Docker container name for `job_id`.
pub fn container_name(job_id: &str) -> String {
    format!("{}{}", CONTAINER_PREFIX, job_id)
}

/// Result of a successful crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOutput {
    /// Per-job working directory, removed after a successful publish.
    pub work_dir: PathBuf,
    /// Directory holding the collection files to publish.
    pub output_dir: PathBuf,
}

impl From<&CrawlPaths> for CrawlOutput {
    fn from(paths: &CrawlPaths) -> Self {
        Self {
            work_dir: paths.work_dir.clone(),
            output_dir: paths.output_dir(),
        }
    }
}

/// Executes one archiving run for a job's URL set.
#[async_trait]
pub trait ArchiveRunner: Send + Sync {
    /// Crawl `job.urls` into a collection named after `job.id`.
    ///
    /// A non-zero exit or launch failure is `CrawlExecutionFailed`; a fired
    /// `cancellation_token` kills the crawl and yields `JobCancelled`.
    async fn run(
        &self,
        job: &CrawlJob,
        cancellation_token: &CancellationToken,
    ) -> Result<CrawlOutput>;
}

/// Runs `docker run ... webrecorder/browsertrix-crawler crawl ...` per job.
pub struct DockerArchiveRunner {
    config: CrawlerConfig,
}

impl DockerArchiveRunner {
    pub fn new(config: CrawlerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn paths(&self, job_id: &str) -> CrawlPaths {
        CrawlPaths::new(&self.config.crawls_dir, job_id)
    }

    fn profile_archive(&self, name: &str) -> PathBuf {
        self.config.profiles_dir.join(format!("{}.tar.gz", name))
    }

    /// Pick a profile by rule and keep it only if its archive exists locally.
    pub async fn select_profile(&self, job: &CrawlJob) -> Option<String> {
        let name = self.config.profile_rules.select(&job.urls)?;
        if fs::file_exists(&self.profile_archive(name)).await {
            info!(job_id = %job.id, profile = %name, "Using saved browser profile");
            Some(name.to_string())
        } else {
            debug!(job_id = %job.id, profile = %name, "Matched profile is not available locally");
            None
        }
    }

    /// Arguments passed to the docker binary.
    pub fn build_args(
        &self,
        paths: &CrawlPaths,
        work_dir: &Path,
        profiles_dir: &Path,
        profile: Option<&str>,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            format!("--name={}", container_name(&paths.job_id)),
        ];

        if let Some(proxy) = &self.config.proxy_url {
            args.push(format!("--env=PROXY_SERVER={}", proxy));
        }

        args.extend([
            "-v".into(),
            format!("{}:/crawls/", work_dir.display()),
            "-v".into(),
            format!("{}:/crawls/profiles/", profiles_dir.display()),
            format!("--cpus={}", self.config.cpus),
            format!("--memory={}", self.config.memory),
            self.config.image.clone(),
            "crawl".into(),
            "--urlFile".into(),
            "/crawls/temp/links.txt".into(),
            "--generateWACZ".into(),
            "--scopeType".into(),
            "page".into(),
            "--diskUtilization".into(),
            "99".into(),
            "--collection".into(),
            paths.job_id.clone(),
        ]);

        if let Some(name) = profile {
            args.push(format!("--profile=/crawls/profiles/{}.tar.gz", name));
        }

        args
    }

    /// Force-remove the job's container.
    ///
    /// Killing the docker CLI leaves the container running, so a cancelled
    /// crawl is stopped here.
    async fn remove_container(&self, job_id: &str) {
        let name = container_name(job_id);
        let removal = tokio_command(&self.config.docker_path)
            .args(["rm", "-f", name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match tokio::time::timeout(CONTAINER_REMOVE_TIMEOUT, removal).await {
            Ok(Ok(status)) if status.success() => {
                info!(job_id = %job_id, container = %name, "Removed cancelled crawl container");
            }
            Ok(Ok(status)) => {
                warn!(job_id = %job_id, container = %name, "docker rm exited with {}", status);
            }
            Ok(Err(e)) => {
                warn!(job_id = %job_id, container = %name, "Failed to run docker rm: {}", e);
            }
            Err(_) => {
                warn!(job_id = %job_id, container = %name, "docker rm timed out");
            }
        }
    }
}

/// Log every line of `reader` until EOF. Invalid UTF-8 is replaced, never
/// treated as the end of the stream.
async fn drain_lines<R>(job_id: &str, stream: &'static str, reader: R) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                debug!(job_id = %job_id, stream, "crawler: {}", line.trim_end());
                count += 1;
            }
            Err(e) => {
                warn!(job_id = %job_id, stream, "Stopped reading crawler output: {}", e);
                break;
            }
        }
    }
    count
}

fn forward_lines<R>(job_id: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        drain_lines(&job_id, stream, reader).await;
    });
}

#[async_trait]
impl ArchiveRunner for DockerArchiveRunner {
    async fn run(
        &self,
        job: &CrawlJob,
        cancellation_token: &CancellationToken,
    ) -> Result<CrawlOutput> {
        let paths = self.paths(&job.id);
        fs::ensure_dir_all_with_op("creating crawl directory", &paths.temp_dir()).await?;

        let profile = self.select_profile(job).await;
        fs::write_string(&paths.url_file(), &job.urls.join("\n")).await?;

        // Docker bind mounts need absolute host paths.
        let work_dir = fs::absolute(&paths.work_dir)?;
        let profiles_dir = fs::absolute(&self.config.profiles_dir)?;
        let args = self.build_args(&paths, &work_dir, &profiles_dir, profile.as_deref());

        info!(job_id = %job.id, urls = job.urls.len(), "Starting crawl");
        debug!(job_id = %job.id, "{} {}", self.config.docker_path, args.join(" "));

        let mut child = tokio_command(&self.config.docker_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::crawl_failed(
                    &job.id,
                    format!("failed to launch {}: {}", self.config.docker_path, e),
                )
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(job.id.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(job.id.clone(), "stderr", stderr);
        }

        let exit = wait_or_cancel(&mut child, cancellation_token)
            .await
            .map_err(|e| Error::crawl_failed(&job.id, format!("failed to wait for crawler: {}", e)))?;

        match exit {
            ProcessExit::Success => {
                info!(job_id = %job.id, "Crawl finished");
                Ok(CrawlOutput::from(&paths))
            }
            ProcessExit::Cancelled => {
                self.remove_container(&job.id).await;
                Err(Error::JobCancelled {
                    job_id: job.id.clone(),
                    reason: "crawl cancelled".to_string(),
                })
            }
            failed @ ProcessExit::Failed(_) => {
                Err(Error::crawl_failed(&job.id, format!("crawler {}", failed)))
            }
        }
    }
}
