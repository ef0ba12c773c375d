/// Error types for the telemetry hooks
pub mod error;

/// Settings and crawl job identity
pub mod config;

/// Stats collector seam shared with the crawler
pub mod stats;

/// Wire payloads for the monitoring backend
pub mod payloads;

/// Monitoring backend client
pub mod api;

/// Log handler counting and buffering records
pub mod collectors;

/// Periodic reporters
pub mod reporters;

/// Monitor rule registration
pub mod alerts;

/// Spider lifecycle hooks
pub mod extension;

/// Per-job wiring of all of the above
pub mod telemetry;

// Re-export commonly used types
pub use api::{ApiClient, Backend, HttpBackend, MockBackend};
pub use config::{Config, JobInfo};
pub use error::{ApiError, ConfigError, TelemetryError};
pub use extension::SpiderExtension;
pub use stats::{MemoryStats, StatsStore};
pub use telemetry::Telemetry;
