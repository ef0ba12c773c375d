//! JSON bodies exchanged with the monitoring backend
//!
//! Field names are part of the backend's API and must not be renamed.

use crate::config::{Config, JobInfo};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Format of `record_time` fields
pub const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Format of the time a log record was emitted, with milliseconds
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";
/// Format of calendar dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One buffered error-level log record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLogRecord {
    pub host: String,
    pub project: String,
    pub spider: String,
    pub job_id: String,
    /// When the record entered the buffer
    pub record_time: String,
    /// Formatted log message
    pub content: String,
    /// Level name, e.g. `ERROR`
    pub level: String,
    /// When the record was emitted
    pub log_time: String,
    /// Logger target
    pub module: String,
    pub lineno: Option<u32>,
    pub exc_info: Option<String>,
    /// Module path of the emitting code
    pub func_name: Option<String>,
}

/// Error log rate over either the current day or the current hour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRateReport {
    pub host: String,
    pub project: String,
    pub spider: String,
    pub job_id: String,
    pub log_date: String,
    pub record_time: String,
    pub log_total_count: u64,
    pub log_error_count: u64,
    pub log_error_rate: f64,
    /// Present only on the hourly report
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_hour: Option<u32>,
}

impl ErrorRateReport {
    /// Daily report computed from the daily counters
    pub fn daily(job: &JobInfo, now: DateTime<Local>, total: u64, errors: u64) -> Self {
        Self {
            host: job.host.clone(),
            project: job.project.clone(),
            spider: job.spider.clone(),
            job_id: job.job_id.clone(),
            log_date: now.format(DATE_FORMAT).to_string(),
            record_time: now.format(RECORD_TIME_FORMAT).to_string(),
            log_total_count: total,
            log_error_count: errors,
            log_error_rate: error_rate(errors, total),
            log_hour: None,
        }
    }

    /// Hourly report computed from the hourly counters
    pub fn hourly(job: &JobInfo, now: DateTime<Local>, total: u64, errors: u64) -> Self {
        use chrono::Timelike;

        Self {
            log_hour: Some(now.hour()),
            ..Self::daily(job, now, total, errors)
        }
    }
}

/// Alerting rule registered for a running job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorRule {
    pub spider_host: String,
    pub spider_project: String,
    pub spider_name: String,
    pub spider_job_id: String,
    /// Evaluation period in seconds
    pub monitor_freq: u64,
    pub errlog_rate_limit: f64,
    /// Memory limit in MB
    pub memory_use_limit: u64,
}

impl MonitorRule {
    pub fn for_job(job: &JobInfo, config: &Config) -> Self {
        Self {
            spider_host: job.host.clone(),
            spider_project: job.project.clone(),
            spider_name: job.spider.clone(),
            spider_job_id: job.job_id.clone(),
            monitor_freq: config.monitor_freq,
            errlog_rate_limit: config.errlog_rate_limit,
            memory_use_limit: config.memory_use_limit,
        }
    }
}

/// Body of the monitor rule delete request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorRuleRemoval {
    pub spider_job_id: String,
}

/// Snapshot of the crawler's stats table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsReport {
    pub host: String,
    pub project: String,
    pub spider: String,
    pub job_id: String,
    pub record_time: String,
    /// Close reason, only on the final report
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    pub stats: BTreeMap<String, Value>,
}

impl StatsReport {
    pub fn new(
        job: &JobInfo,
        now: DateTime<Local>,
        stats: BTreeMap<String, Value>,
        reason: Option<String>,
    ) -> Self {
        Self {
            host: job.host.clone(),
            project: job.project.clone(),
            spider: job.spider.clone(),
            job_id: job.job_id.clone(),
            record_time: now.format(RECORD_TIME_FORMAT).to_string(),
            reason,
            stats,
        }
    }
}

/// Share of error records, rounded to four decimals; zero when nothing was logged
pub fn error_rate(errors: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = errors as f64 / total as f64;
    (rate * 10_000.0).round() / 10_000.0
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_error_rate_is_a_fraction(errors: u32, extra: u32) -> bool {
        let errors = errors as u64;
        let total = errors + extra as u64;
        let rate = error_rate(errors, total);
        (0.0..=1.0).contains(&rate)
    }

    #[quickcheck]
    fn prop_error_rate_has_four_decimals(errors: u16, extra: u16) -> bool {
        let errors = errors as u64;
        let total = errors + extra as u64;
        let scaled = error_rate(errors, total) * 10_000.0;
        (scaled - scaled.round()).abs() < 1e-6
    }
}
