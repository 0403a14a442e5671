//! Archive runner: executes one browsertrix crawl per job.

pub mod profile;
pub mod runner;

use std::path::{Path, PathBuf};

pub use profile::{ProfileRule, ProfileRules};
pub use runner::{ArchiveRunner, CrawlOutput, DockerArchiveRunner};

/// Default crawler container image.
pub const DEFAULT_CRAWLER_IMAGE: &str = "webrecorder/browsertrix-crawler";

/// Subprocess contract for the archiving crawler.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Root of the per-job working directories.
    pub crawls_dir: PathBuf,
    /// Directory holding saved browser profiles (`<name>.tar.gz`).
    pub profiles_dir: PathBuf,
    pub docker_path: String,
    pub image: String,
    /// CPU share passed as `--cpus`.
    pub cpus: String,
    /// Memory ceiling passed as `--memory`.
    pub memory: String,
    pub proxy_url: Option<String>,
    pub profile_rules: ProfileRules,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            crawls_dir: PathBuf::from("crawls"),
            profiles_dir: PathBuf::from("profiles"),
            docker_path: "docker".to_string(),
            image: DEFAULT_CRAWLER_IMAGE.to_string(),
            cpus: "0.8".to_string(),
            memory: "1g".to_string(),
            proxy_url: None,
            profile_rules: ProfileRules::default(),
        }
    }
}

/// Filesystem layout of one job's crawl.
///
/// ```text
/// {crawls_dir}/{id}/                      work dir, mounted at /crawls/
/// {crawls_dir}/{id}/temp/links.txt        input URL list
/// {crawls_dir}/{id}/collections/{id}/     crawler output
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlPaths {
    pub job_id: String,
    pub work_dir: PathBuf,
}

impl CrawlPaths {
    pub fn new(crawls_dir: &Path, job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            work_dir: crawls_dir.join(job_id),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }

    pub fn url_file(&self) -> PathBuf {
        self.temp_dir().join("links.txt")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("collections").join(&self.job_id)
    }

    /// Combined WACZ archive produced by the crawler.
    pub fn archive_file(&self) -> PathBuf {
        self.output_dir().join(format!("{}.wacz", self.job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_paths() {
        let paths = CrawlPaths::new(Path::new("crawls"), "abc");
        assert_eq!(paths.work_dir, PathBuf::from("crawls/abc"));
        assert_eq!(paths.url_file(), PathBuf::from("crawls/abc/temp/links.txt"));
        assert_eq!(paths.output_dir(), PathBuf::from("crawls/abc/collections/abc"));
        assert_eq!(
            paths.archive_file(),
            PathBuf::from("crawls/abc/collections/abc/abc.wacz")
        );
    }
}
