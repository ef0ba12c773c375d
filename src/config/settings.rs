use crate::error::ConfigError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default monitoring backend address
pub const DEFAULT_BACKEND: &str = "http://localhost:16800";

/// Settings for forwarding crawl telemetry to the monitoring backend
///
/// Every field has a default, so a configuration file only needs to list the
/// values it changes. The same values can be overridden through `CS_*`
/// environment variables, which is how the crawler host usually passes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the monitoring backend
    pub backend: String,
    /// Token sent in the `Authorization` header
    pub api_token: String,
    /// How often the backend should evaluate the job's monitor rule (seconds)
    pub monitor_freq: u64,
    /// Error log rate above which the backend raises an alert
    pub errlog_rate_limit: f64,
    /// Memory usage above which the backend raises an alert (MB)
    pub memory_use_limit: u64,
    /// Number of buffered error records that forces an immediate flush
    pub err_log_buffer_size: usize,
    /// Debounce delay before buffered error records are flushed (seconds)
    pub err_log_send_freq: u64,
    /// Whether error record contents are forwarded at all
    pub enable_send_err_log: bool,
    /// Whether a monitor rule is registered for the job
    pub enable_monitor_rule: bool,
    /// Interval between error rate reports (seconds)
    pub errlog_rate_interval: u64,
    /// Interval between stats snapshots (seconds)
    pub stats_send_freq: u64,
    /// Whether stats snapshots are pushed
    pub enable_send_stats: bool,
    /// Timeout for a single backend request (seconds)
    pub request_timeout: u64,
    /// Most verbose level counted and forwarded by the log handler
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            api_token: String::new(),
            monitor_freq: 300,
            errlog_rate_limit: 0.005,
            memory_use_limit: 500,
            err_log_buffer_size: 500,
            err_log_send_freq: 20,
            enable_send_err_log: true,
            enable_monitor_rule: true,
            errlog_rate_interval: 60,
            stats_send_freq: 60,
            enable_send_stats: true,
            request_timeout: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a parse
    /// error for malformed TOML, and `ConfigError::ValidationError` if a value
    /// is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional path, falling back to defaults
    ///
    /// A missing or unreadable file is not fatal; invalid contents are.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => match Self::from_file(path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    Ok(config)
                }
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file unreadable ({}), using defaults", e);
                    Ok(Config::default())
                }
                Err(e) => Err(e),
            },
            None => {
                info!("Using default configuration");
                Ok(Config::default())
            }
        }
    }

    /// Override values from `CS_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Override values using an arbitrary variable lookup
    ///
    /// Variables that are not set leave the current value untouched.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("CS_BACKEND") {
            self.backend = backend;
        }
        if let Some(token) = lookup("CS_API_TOKEN") {
            self.api_token = token;
        }
        override_parsed(&lookup, "CS_MONITOR_FREQ", &mut self.monitor_freq)?;
        override_parsed(&lookup, "CS_ERRLOG_RATE_LIMIT", &mut self.errlog_rate_limit)?;
        override_parsed(&lookup, "CS_MEMORY_USE_LIMIT", &mut self.memory_use_limit)?;
        override_parsed(&lookup, "CS_ERR_LOG_BUFFER_SIZE", &mut self.err_log_buffer_size)?;
        override_parsed(&lookup, "CS_ERR_LOG_SEND_FREQ", &mut self.err_log_send_freq)?;
        override_bool(&lookup, "CS_ENABLE_SEND_ERR_LOG", &mut self.enable_send_err_log)?;
        override_bool(&lookup, "CS_ENABLE_MONITOR_RULE", &mut self.enable_monitor_rule)?;
        override_parsed(&lookup, "CS_ERRLOG_RATE_INTERVAL", &mut self.errlog_rate_interval)?;
        override_parsed(&lookup, "CS_STATS_SEND_FREQ", &mut self.stats_send_freq)?;
        override_bool(&lookup, "CS_ENABLE_SEND_STATS", &mut self.enable_send_stats)?;
        override_parsed(&lookup, "CS_REQUEST_TIMEOUT", &mut self.request_timeout)?;
        if let Some(level) = lookup("CS_LOG_LEVEL") {
            self.log_level = level;
        }
        self.validate()
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.backend.starts_with("http://") || self.backend.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "backend must be an http(s) URL, got '{}'",
                self.backend
            )));
        }
        if self.err_log_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "err_log_buffer_size must be at least 1".to_string(),
            ));
        }
        let intervals = [
            ("monitor_freq", self.monitor_freq),
            ("err_log_send_freq", self.err_log_send_freq),
            ("errlog_rate_interval", self.errlog_rate_interval),
            ("stats_send_freq", self.stats_send_freq),
            ("request_timeout", self.request_timeout),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be at least 1 second",
                    name
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.errlog_rate_limit) {
            return Err(ConfigError::ValidationError(format!(
                "errlog_rate_limit must be within [0, 1], got {}",
                self.errlog_rate_limit
            )));
        }
        self.level_filter()?;
        Ok(())
    }

    /// Parsed form of `log_level`
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        log::LevelFilter::from_str(&self.log_level).map_err(|_| {
            ConfigError::ValidationError(format!("unknown log_level '{}'", self.log_level))
        })
    }

    pub fn err_log_send_interval(&self) -> Duration {
        Duration::from_secs(self.err_log_send_freq)
    }

    pub fn errlog_rate_period(&self) -> Duration {
        Duration::from_secs(self.errlog_rate_interval)
    }

    pub fn stats_send_period(&self) -> Duration {
        Duration::from_secs(self.stats_send_freq)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(name) {
        *target = raw.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("{} has an invalid value '{}'", name, raw))
        })?;
    }
    Ok(())
}

fn override_bool<F>(lookup: &F, name: &str, target: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *target = match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "{} has an invalid value '{}'",
                    name, raw
                )))
            }
        };
    }
    Ok(())
}
