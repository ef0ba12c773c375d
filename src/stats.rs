//! Stats collector seam shared with the host crawler
//!
//! The crawler owns a key/value stats table (request counts, item counts,
//! start time, ...). This crate reads it to build snapshots and writes the
//! `log_count/*` counters into it from the log handler.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Daily count of every handled log record
pub const DAILY_TOTAL_KEY: &str = "log_count/log_daily_total_count";
/// Daily count of error-level log records
pub const DAILY_ERROR_KEY: &str = "log_count/log_daily_error_count";
/// Hourly count of every handled log record
pub const HOURLY_TOTAL_KEY: &str = "log_count/log_hourly_total_count";
/// Hourly count of error-level log records
pub const HOURLY_ERROR_KEY: &str = "log_count/log_hourly_error_count";

/// Key/value stats table provided by the crawler
#[cfg_attr(test, mockall::automock)]
pub trait StatsStore: Send + Sync {
    /// Current value for `key`, if any
    fn get_value(&self, key: &str) -> Option<Value>;

    /// Overwrite the value for `key`
    fn set_value(&self, key: &str, value: Value);

    /// Add `by` to a numeric value, treating a missing key as zero
    fn inc_value(&self, key: &str, by: i64);

    /// Copy of the whole table
    fn get_stats(&self) -> BTreeMap<String, Value>;

    /// Remove every entry
    fn clear(&self);

    /// Value for `key` as a counter; zero when absent or not a non-negative integer
    fn get_count(&self, key: &str) -> u64 {
        self.get_value(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }
}

/// In-process stats table
#[derive(Debug, Default)]
pub struct MemoryStats {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsStore for MemoryStats {
    fn get_value(&self, key: &str) -> Option<Value> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set_value(&self, key: &str, value: Value) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
    }

    fn inc_value(&self, key: &str, by: i64) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let current = values.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
        values.insert(key.to_string(), Value::from(current + by));
    }

    fn get_stats(&self) -> BTreeMap<String, Value> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn clear(&self) {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
