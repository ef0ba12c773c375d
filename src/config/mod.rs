/// Telemetry settings and their loading rules
pub mod settings;

/// Crawl job identity
pub mod job;

pub use job::{local_hostname, JobInfo};
pub use settings::{Config, DEFAULT_BACKEND};
