use crate::api::ApiClient;
use crate::config::JobInfo;
use crate::extension::SpiderExtension;
use crate::payloads::ErrorRateReport;
use crate::reporters::periodic::PeriodicTask;
use crate::stats::{StatsStore, DAILY_ERROR_KEY, DAILY_TOTAL_KEY, HOURLY_ERROR_KEY, HOURLY_TOTAL_KEY};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::info;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct RateSender {
    job: JobInfo,
    stats: Arc<dyn StatsStore>,
    api: ApiClient,
}

impl RateSender {
    async fn send_at(&self, now: DateTime<Local>) {
        let daily = ErrorRateReport::daily(
            &self.job,
            now,
            self.stats.get_count(DAILY_TOTAL_KEY),
            self.stats.get_count(DAILY_ERROR_KEY),
        );
        self.api.send_errlog_rate(daily).await;

        let hourly = ErrorRateReport::hourly(
            &self.job,
            now,
            self.stats.get_count(HOURLY_TOTAL_KEY),
            self.stats.get_count(HOURLY_ERROR_KEY),
        );
        self.api.send_errlog_rate(hourly).await;
    }
}

/// Reports the daily and hourly error log rates while the spider runs
///
/// Reads the counters maintained by the log handler, so it is only
/// meaningful together with an installed [`ErrorLogHandler`].
///
/// [`ErrorLogHandler`]: crate::collectors::ErrorLogHandler
pub struct ErrorRateReporter {
    sender: RateSender,
    period: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl ErrorRateReporter {
    pub fn new(job: JobInfo, stats: Arc<dyn StatsStore>, api: ApiClient) -> Self {
        let period = api.config().errlog_rate_period();
        Self {
            sender: RateSender { job, stats, api },
            period,
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Send both reports now
    pub async fn send(&self) {
        self.sender.send_at(Local::now()).await;
    }

    /// Send both reports as of `now`
    pub async fn send_at(&self, now: DateTime<Local>) {
        self.sender.send_at(now).await;
    }
}

#[async_trait]
impl SpiderExtension for ErrorRateReporter {
    fn name(&self) -> &str {
        "ErrorRateReporter"
    }

    async fn spider_opened(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }

        let sender = self.sender.clone();
        *task = Some(PeriodicTask::start("error rate", self.period, move || {
            let sender = sender.clone();
            async move { sender.send_at(Local::now()).await }
        }));
        info!(
            "Reporting error log rate every {}s for job {}",
            self.period.as_secs(),
            self.sender.job.job_id
        );
    }

    async fn spider_closed(&self, reason: &str) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(task) = task {
            task.stop().await;
            self.send().await;
            info!("Error rate reporting stopped ({})", reason);
        }
    }
}
