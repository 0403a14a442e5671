//! crawl-queue library crate.
//!
//! This module exposes the core functionality for integration testing.

pub mod api;
pub mod config;
pub mod crawler;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod publisher;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};

// Panicking jobs are recorded as failed through their `JoinError`.
#[cfg(not(panic = "unwind"))]
compile_error!("crawl-queue must be built with panic = \"unwind\"");
