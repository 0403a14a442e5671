//! Domain types for crawl jobs.

pub mod job;

pub use job::{CrawlJob, JobStatus, validate_urls};
