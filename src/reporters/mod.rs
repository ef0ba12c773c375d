/// Fixed-period background task
pub mod periodic;

/// Error log rate reports
pub mod error_rate;

/// Stats table snapshots
pub mod stats;

pub use error_rate::ErrorRateReporter;
pub use periodic::PeriodicTask;
pub use stats::StatsReporter;
