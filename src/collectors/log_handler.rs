use crate::api::ApiClient;
use crate::config::JobInfo;
use crate::error::TelemetryError;
use crate::payloads::{ErrorLogRecord, DATE_FORMAT, LOG_TIME_FORMAT, RECORD_TIME_FORMAT};
use crate::stats::{StatsStore, DAILY_ERROR_KEY, DAILY_TOTAL_KEY, HOURLY_ERROR_KEY, HOURLY_TOTAL_KEY};
use chrono::{DateTime, Local, Timelike};
use log::kv::{Key, Source};
use log::{LevelFilter, Log, Metadata, Record};
use serde_json::Value;
use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Target prefix of this crate's own records; they are counted but never buffered
const OWN_TARGET: &str = "cs_sender";

/// Logger that receives every record besides the handler itself
pub struct ForwardLogger {
    pub logger: Box<dyn Log>,
    pub max_level: LevelFilter,
}

impl ForwardLogger {
    /// Console output configured from `RUST_LOG`
    pub fn console() -> Self {
        let logger = env_logger::Builder::from_default_env().build();
        let max_level = logger.filter();
        Self {
            logger: Box::new(logger),
            max_level,
        }
    }
}

/// Day and hour the counters currently belong to
#[derive(Debug, Default)]
struct CountingPeriod {
    date: Option<String>,
    hour: Option<u32>,
}

/// Pending debounce flush; `id` tells a stale timer apart from a newer one
struct PendingFlush {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerSlot {
    pending: Option<PendingFlush>,
    next_id: u64,
}

struct HandlerState {
    job: JobInfo,
    stats: Arc<dyn StatsStore>,
    api: ApiClient,
    runtime: Handle,
    level: LevelFilter,
    buffer_size: usize,
    flush_interval: Duration,
    send_enabled: bool,
    period: Mutex<CountingPeriod>,
    buffer: Mutex<Vec<ErrorLogRecord>>,
    timer: Mutex<TimerSlot>,
    forward: Option<ForwardLogger>,
}

/// Log handler feeding the crawler's log counters and the error log buffer
///
/// Every handled record bumps the daily and hourly totals in the stats
/// store; error-level records also bump the error counters and, when
/// enabled, are buffered and shipped to the backend in batches. A batch
/// leaves when the buffer reaches `err_log_buffer_size` records or
/// `err_log_send_freq` seconds after the first record of the batch,
/// whichever comes first.
///
/// The handler is cheap to clone; clones share the same buffer and timer.
#[derive(Clone)]
pub struct ErrorLogHandler {
    state: Arc<HandlerState>,
}

impl ErrorLogHandler {
    /// Create a handler on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::NoRuntime` when called outside a runtime, since
    /// batches are sent from runtime tasks.
    pub fn new(
        job: JobInfo,
        stats: Arc<dyn StatsStore>,
        api: ApiClient,
    ) -> Result<Self, TelemetryError> {
        Self::with_forward(job, stats, api, None)
    }

    /// Create a handler that also passes records on to another logger
    pub fn with_forward(
        job: JobInfo,
        stats: Arc<dyn StatsStore>,
        api: ApiClient,
        forward: Option<ForwardLogger>,
    ) -> Result<Self, TelemetryError> {
        let runtime =
            Handle::try_current().map_err(|e| TelemetryError::NoRuntime(e.to_string()))?;
        let config = api.config();
        let level = config.level_filter()?;
        let buffer_size = config.err_log_buffer_size;
        let flush_interval = config.err_log_send_interval();
        let send_enabled = config.enable_send_err_log;

        Ok(Self {
            state: Arc::new(HandlerState {
                job,
                stats,
                level,
                buffer_size,
                flush_interval,
                send_enabled,
                api,
                runtime,
                period: Mutex::new(CountingPeriod::default()),
                buffer: Mutex::new(Vec::new()),
                timer: Mutex::new(TimerSlot::default()),
                forward,
            }),
        })
    }

    /// Register this handler as the process-wide logger
    pub fn install(&self) -> Result<(), TelemetryError> {
        let forward_level = self
            .state
            .forward
            .as_ref()
            .map(|f| f.max_level)
            .unwrap_or(LevelFilter::Off);
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| TelemetryError::SetLogger(e.to_string()))?;
        log::set_max_level(self.state.level.max(forward_level));
        Ok(())
    }

    /// Number of records waiting to be sent
    pub fn buffered(&self) -> usize {
        lock(&self.state.buffer).len()
    }

    /// Whether a debounce flush is scheduled
    pub fn flush_pending(&self) -> bool {
        lock(&self.state.timer).pending.is_some()
    }

    /// Send everything buffered now
    ///
    /// Cancels the pending debounce timer. Returns the send task, or `None`
    /// when the buffer was empty.
    pub fn flush_buffer(&self) -> Option<JoinHandle<()>> {
        if let Some(pending) = lock(&self.state.timer).pending.take() {
            pending.handle.abort();
        }
        self.state.send_buffered()
    }

    /// Flush if a debounce flush is pending and drop the timer
    pub fn close(&self) -> Option<JoinHandle<()>> {
        if self.flush_pending() {
            return self.flush_buffer();
        }
        None
    }

    /// Handle a record as if it was emitted at `now`
    ///
    /// Records emitted on the same thread while the stats store is being
    /// updated (a store that logs, for instance) are not counted again.
    pub fn handle_at(&self, record: &Record, now: DateTime<Local>) {
        let Some(_guard) = ReentryGuard::enter() else {
            return;
        };
        let state = &self.state;
        let is_error = record.level() == log::Level::Error;

        let (new_day, new_hour) = {
            let mut period = lock(&state.period);
            let today = now.format(DATE_FORMAT).to_string();
            let new_day = period.date.as_deref() != Some(today.as_str());
            if new_day {
                period.date = Some(today);
            }
            let hour = now.hour();
            let new_hour = period.hour != Some(hour);
            if new_hour {
                period.hour = Some(hour);
            }
            (new_day, new_hour)
        };

        // The period lock is released: the store may log
        if new_day {
            state.stats.set_value(DAILY_TOTAL_KEY, Value::from(0));
            state.stats.set_value(DAILY_ERROR_KEY, Value::from(0));
        }
        if new_hour {
            state.stats.set_value(HOURLY_TOTAL_KEY, Value::from(0));
            state.stats.set_value(HOURLY_ERROR_KEY, Value::from(0));
        }
        state.stats.inc_value(DAILY_TOTAL_KEY, 1);
        state.stats.inc_value(HOURLY_TOTAL_KEY, 1);
        if is_error {
            state.stats.inc_value(DAILY_ERROR_KEY, 1);
            state.stats.inc_value(HOURLY_ERROR_KEY, 1);
        }

        if !is_error || !state.send_enabled || record.target().starts_with(OWN_TARGET) {
            return;
        }

        let entry = state.error_record(record, now);
        let buffered = {
            let mut buffer = lock(&state.buffer);
            buffer.push(entry);
            buffer.len()
        };

        if buffered >= state.buffer_size {
            self.flush_buffer();
        } else {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let mut slot = lock(&self.state.timer);
        if slot.pending.is_some() {
            return;
        }

        let id = slot.next_id;
        slot.next_id += 1;

        let state = Arc::clone(&self.state);
        let delay = state.flush_interval;
        let handle = self.state.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            state.timer_fired(id);
        });
        slot.pending = Some(PendingFlush { id, handle });
    }
}

impl HandlerState {
    fn error_record(&self, record: &Record, now: DateTime<Local>) -> ErrorLogRecord {
        ErrorLogRecord {
            host: self.job.host.clone(),
            project: self.job.project.clone(),
            spider: self.job.spider.clone(),
            job_id: self.job.job_id.clone(),
            record_time: now.format(RECORD_TIME_FORMAT).to_string(),
            content: record.args().to_string(),
            level: record.level().as_str().to_string(),
            log_time: now.format(LOG_TIME_FORMAT).to_string(),
            module: record.target().to_string(),
            lineno: record.line(),
            exc_info: exception_info(record),
            func_name: record.module_path().map(str::to_string),
        }
    }

    fn timer_fired(&self, id: u64) {
        {
            let mut slot = lock(&self.timer);
            match &slot.pending {
                Some(pending) if pending.id == id => slot.pending = None,
                // A flush already happened and this timer is stale
                _ => return,
            }
        }
        self.send_buffered();
    }

    fn send_buffered(&self) -> Option<JoinHandle<()>> {
        let batch = std::mem::take(&mut *lock(&self.buffer));
        if batch.is_empty() {
            return None;
        }

        let api = self.api.clone();
        Some(self.runtime.spawn(async move {
            api.send_errlog_content(batch).await;
        }))
    }
}

impl Log for ErrorLogHandler {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.state.level
            || self
                .state
                .forward
                .as_ref()
                .is_some_and(|f| f.logger.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if record.level() <= self.state.level {
            self.handle_at(record, Local::now());
        }
        if let Some(forward) = &self.state.forward {
            if forward.logger.enabled(record.metadata()) {
                forward.logger.log(record);
            }
        }
    }

    fn flush(&self) {
        self.flush_buffer();
        if let Some(forward) = &self.state.forward {
            forward.logger.flush();
        }
    }
}

/// Exception text attached as an `exc_info` or `error` key-value
fn exception_info(record: &Record) -> Option<String> {
    let kvs = record.key_values();
    kvs.get(Key::from_str("exc_info"))
        .or_else(|| kvs.get(Key::from_str("error")))
        .map(|value| value.to_string())
}

thread_local! {
    static HANDLING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside `handle_at`
struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Option<Self> {
        HANDLING.with(|handling| {
            if handling.replace(true) {
                None
            } else {
                Some(ReentryGuard)
            }
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        HANDLING.with(|handling| handling.set(false));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
