//! Environment-driven application configuration.
//!
//! All settings come from process environment variables (optionally loaded
//! from a `.env` file by the binary). Absent variables fall back to defaults;
//! present but malformed values are rejected at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::crawler::{CrawlerConfig, ProfileRules};
use crate::publisher::PublishConfig;
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Default SQLite location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:crawls.db?mode=rwc";

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Shared secret for protected endpoints. `None` rejects every protected request.
    pub api_token: Option<String>,
    pub log_dir: PathBuf,
    /// Startup reconciliation threshold for jobs left `working` by a previous run.
    pub orphan_timeout: Option<Duration>,
    pub api: ApiServerConfig,
    pub scheduler: SchedulerConfig,
    pub crawler: CrawlerConfig,
    /// Object storage destination. `None` keeps crawl output on local disk.
    pub publish: Option<PublishConfig>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let mut api = ApiServerConfig::default();
        if let Some(bind_address) = env.string("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        if let Some(port) = env.parse::<u16>("API_PORT")? {
            api.port = port;
        }

        let mut scheduler = SchedulerConfig::default();
        if let Some(max) = env.parse::<u32>("MAX_CONCURRENT_CRAWLS")? {
            if max == 0 {
                return Err(Error::config("MAX_CONCURRENT_CRAWLS must be at least 1"));
            }
            scheduler.max_concurrent = max;
        }
        if let Some(ms) = env.parse::<u64>("POLL_INTERVAL_MS")? {
            scheduler.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("BACKOFF_INTERVAL_MS")? {
            scheduler.backoff_interval = Duration::from_millis(ms);
        }
        scheduler.job_timeout = env.parse::<u64>("JOB_TIMEOUT_SECS")?.map(Duration::from_secs);

        let mut crawler = CrawlerConfig::default();
        if let Some(dir) = env.string("CRAWLS_DIR") {
            crawler.crawls_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.string("PROFILES_DIR") {
            crawler.profiles_dir = PathBuf::from(dir);
        }
        if let Some(path) = env.string("DOCKER_PATH") {
            crawler.docker_path = path;
        }
        if let Some(image) = env.string("CRAWLER_IMAGE") {
            crawler.image = image;
        }
        if let Some(cpus) = env.string("CRAWLER_CPUS") {
            crawler.cpus = cpus;
        }
        if let Some(memory) = env.string("CRAWLER_MEMORY") {
            crawler.memory = memory;
        }
        crawler.proxy_url = env.string("PROXY_URL");
        if let Some(rules) = env.string("PROFILE_RULES") {
            crawler.profile_rules = ProfileRules::parse(&rules)?;
        }

        let publish = match env.string("S3_BUCKET") {
            Some(bucket) => {
                let mut publish = PublishConfig::new(bucket);
                publish.endpoint = env.string("S3_ENDPOINT");
                publish.public_base_url = env.string("ARCHIVE_PUBLIC_BASE_URL");
                if let Some(remote) = env.string("RCLONE_REMOTE") {
                    publish.rclone_remote = remote;
                }
                if let Some(path) = env.string("RCLONE_PATH") {
                    publish.rclone_path = path;
                }
                publish.rclone_config = env.string("RCLONE_CONFIG");
                publish.mirror_dir = env.string("PUBLISH_MIRROR_DIR").map(PathBuf::from);
                Some(publish)
            }
            None => None,
        };

        Ok(Self {
            database_url: env
                .string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            api_token: env.string("API_TOKEN"),
            log_dir: PathBuf::from(
                env.string("LOG_DIR")
                    .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
            ),
            orphan_timeout: env
                .parse::<u64>("ORPHAN_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            api,
            scheduler,
            crawler,
            publish,
        })
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::config(format!("Invalid {}='{}': {}", key, raw, e)))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.api_token.is_none());
        assert!(config.publish.is_none());
        assert!(config.orphan_timeout.is_none());
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(3));
        assert_eq!(config.scheduler.backoff_interval, Duration::from_secs(5));
        assert!(config.scheduler.job_timeout.is_none());
        assert_eq!(config.crawler.crawls_dir, PathBuf::from("crawls"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("API_TOKEN", "secret"),
            ("API_PORT", "8080"),
            ("MAX_CONCURRENT_CRAWLS", "4"),
            ("JOB_TIMEOUT_SECS", "600"),
            ("PROXY_URL", "http://proxy:3128"),
            ("S3_BUCKET", "archives"),
            ("S3_ENDPOINT", "https://s3.example.com"),
        ])
        .unwrap();

        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.scheduler.job_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.crawler.proxy_url.as_deref(), Some("http://proxy:3128"));

        let publish = config.publish.unwrap();
        assert_eq!(publish.bucket, "archives");
        assert_eq!(publish.endpoint.as_deref(), Some("https://s3.example.com"));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let config = load(&[("API_TOKEN", "  "), ("S3_BUCKET", "")]).unwrap();
        assert!(config.api_token.is_none());
        assert!(config.publish.is_none());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = load(&[("POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(load(&[("MAX_CONCURRENT_CRAWLS", "0")]).is_err());
    }
}
