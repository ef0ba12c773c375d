use crate::api::ApiClient;
use crate::config::JobInfo;
use crate::extension::SpiderExtension;
use crate::payloads::StatsReport;
use crate::reporters::periodic::PeriodicTask;
use crate::stats::StatsStore;
use async_trait::async_trait;
use chrono::Local;
use log::info;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct SnapshotSender {
    job: JobInfo,
    stats: Arc<dyn StatsStore>,
    api: ApiClient,
}

impl SnapshotSender {
    async fn send(&self, reason: Option<String>) {
        let report = StatsReport::new(&self.job, Local::now(), self.stats.get_stats(), reason);
        self.api.send_stats_data(report).await;
    }
}

/// Pushes the crawler's stats table to the backend while the spider runs
///
/// A final snapshot carrying the close reason is sent when the spider closes.
pub struct StatsReporter {
    sender: SnapshotSender,
    period: Duration,
    enabled: bool,
    task: Mutex<Option<PeriodicTask>>,
}

impl StatsReporter {
    pub fn new(job: JobInfo, stats: Arc<dyn StatsStore>, api: ApiClient) -> Self {
        let period = api.config().stats_send_period();
        let enabled = api.config().enable_send_stats;
        Self {
            sender: SnapshotSender { job, stats, api },
            period,
            enabled,
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

    /// Push one snapshot now
    pub async fn send(&self, reason: Option<&str>) {
        self.sender.send(reason.map(str::to_string)).await;
    }
}

#[async_trait]
impl SpiderExtension for StatsReporter {
    fn name(&self) -> &str {
        "StatsReporter"
    }

    async fn spider_opened(&self) {
        if !self.enabled {
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }

        let sender = self.sender.clone();
        *task = Some(PeriodicTask::start("stats", self.period, move || {
            let sender = sender.clone();
            async move { sender.send(None).await }
        }));
        info!("Pushing crawler stats every {}s", self.period.as_secs());
    }

    async fn spider_closed(&self, reason: &str) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(task) = task {
            task.stop().await;
            self.send(Some(reason)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiRequest, MockBackend};
    use crate::config::Config;
    use crate::stats::MemoryStats;
    use serde_json::json;

    fn reporter(config: Config) -> (StatsReporter, MockBackend, Arc<MemoryStats>) {
        let backend = MockBackend::success();
        let stats = Arc::new(MemoryStats::new());
        let api = ApiClient::new(Arc::new(backend.clone()), config);
        let reporter = StatsReporter::new(
            JobInfo::new("news", "articles", "job-3"),
            stats.clone(),
            api,
        );
        (reporter, backend, stats)
    }

    fn stats_reports(backend: &MockBackend) -> Vec<StatsReport> {
        backend
            .requests()
            .into_iter()
            .filter_map(|request| match request {
                ApiRequest::SendStats(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_final_snapshots() {
        let (reporter, backend, stats) = reporter(Config::default());
        stats.set_value("item_scraped_count", json!(1));

        reporter.spider_opened().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        stats.set_value("item_scraped_count", json!(25));
        tokio::time::sleep(Duration::from_secs(60)).await;

        stats.set_value("finish_reason", json!("finished"));
        reporter.spider_closed("finished").await;

        let reports = stats_reports(&backend);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].stats["item_scraped_count"], json!(1));
        assert_eq!(reports[1].stats["item_scraped_count"], json!(25));
        assert_eq!(reports[0].reason, None);
        assert_eq!(reports[2].reason.as_deref(), Some("finished"));
        assert_eq!(reports[2].stats["finish_reason"], json!("finished"));
        assert_eq!(reports[2].job_id, "job-3");
        assert!(!reporter.is_running());
    }

    #[tokio::test]
    async fn test_disabled_reporter_stays_quiet() {
        let config = Config {
            enable_send_stats: false,
            ..Config::default()
        };
        let (reporter, backend, _stats) = reporter(config);

        reporter.spider_opened().await;
        assert!(!reporter.is_running());
        reporter.spider_closed("finished").await;

        assert_eq!(backend.call_count(), 0);
    }
}
