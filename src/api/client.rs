use crate::api::backends::{ApiRequest, Backend, HttpBackend};
use crate::config::{Config, JobInfo};
use crate::error::ApiError;
use crate::payloads::{ErrorLogRecord, ErrorRateReport, MonitorRule, MonitorRuleRemoval, StatsReport};
use log::{info, warn};
use std::sync::Arc;

/// Client for the monitoring backend
///
/// Every call is fire-and-forget from the caller's point of view: a failed
/// request is logged as a warning and dropped. Telemetry must never take the
/// crawl down with it.
#[derive(Clone)]
pub struct ApiClient {
    backend: Arc<dyn Backend>,
    config: Arc<Config>,
}

impl ApiClient {
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    /// Client sending over HTTP to the configured backend
    pub fn from_config(config: Config) -> Result<Self, ApiError> {
        let backend = HttpBackend::from_config(&config)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Push a stats snapshot
    pub async fn send_stats_data(&self, report: StatsReport) {
        self.call(ApiRequest::SendStats(report), "Send crawler stats success")
            .await;
    }

    /// Push one error rate report
    pub async fn send_errlog_rate(&self, report: ErrorRateReport) {
        self.call(ApiRequest::SendErrlogRate(report), "Send errlog rate success")
            .await;
    }

    /// Push a batch of buffered error records
    pub async fn send_errlog_content(&self, records: Vec<ErrorLogRecord>) {
        self.call(
            ApiRequest::SendErrlogContent(records),
            "Send errlog content success",
        )
        .await;
    }

    /// Register the alerting rule for a job, using the configured limits
    pub async fn add_monitor_rule(&self, job: &JobInfo) {
        let rule = MonitorRule::for_job(job, &self.config);
        self.call(ApiRequest::AddMonitorRule(rule), "Add monitor rule")
            .await;
    }

    /// Remove the alerting rule of a job
    pub async fn del_monitor_rule(&self, job_id: &str) {
        let removal = MonitorRuleRemoval {
            spider_job_id: job_id.to_string(),
        };
        self.call(ApiRequest::DelMonitorRule(removal), "Delete monitor rule")
            .await;
    }

    async fn call(&self, request: ApiRequest, success: &str) {
        match self.backend.send(&request).await {
            Ok(text) => info!("{}, {}", success, text),
            Err(e) => warn!("API error, {}, function: {}", e, request.operation()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::backends::{Endpoint, MockBackend};
    use chrono::Local;

    fn job() -> JobInfo {
        JobInfo::new("news", "articles", "job-7").with_host("crawler-03")
    }

    fn client_with(backend: &MockBackend, config: Config) -> ApiClient {
        ApiClient::new(Arc::new(backend.clone()), config)
    }

    #[tokio::test]
    async fn test_add_monitor_rule_uses_configured_limits() {
        let backend = MockBackend::success();
        let config = Config {
            monitor_freq: 60,
            errlog_rate_limit: 0.02,
            memory_use_limit: 1024,
            ..Config::default()
        };
        let client = client_with(&backend, config);

        client.add_monitor_rule(&job()).await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ApiRequest::AddMonitorRule(rule) => {
                assert_eq!(rule.spider_host, "crawler-03");
                assert_eq!(rule.spider_project, "news");
                assert_eq!(rule.spider_name, "articles");
                assert_eq!(rule.spider_job_id, "job-7");
                assert_eq!(rule.monitor_freq, 60);
                assert_eq!(rule.errlog_rate_limit, 0.02);
                assert_eq!(rule.memory_use_limit, 1024);
            }
            other => panic!("Expected AddMonitorRule, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_del_monitor_rule() {
        let backend = MockBackend::success();
        let client = client_with(&backend, Config::default());

        client.del_monitor_rule("job-7").await;

        assert_eq!(
            backend.requests(),
            vec![ApiRequest::DelMonitorRule(MonitorRuleRemoval {
                spider_job_id: "job-7".to_string()
            })]
        );
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let backend = MockBackend::failing("connection refused");
        let client = client_with(&backend, Config::default());

        client
            .send_errlog_rate(ErrorRateReport::daily(&job(), Local::now(), 10, 1))
            .await;
        client.send_errlog_content(Vec::new()).await;
        client.del_monitor_rule("job-7").await;

        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_stats_go_to_stats_endpoint() {
        let backend = MockBackend::success();
        let client = client_with(&backend, Config::default());

        client
            .send_stats_data(StatsReport::new(&job(), Local::now(), Default::default(), None))
            .await;

        assert_eq!(backend.requests_to(Endpoint::SpiderStats).len(), 1);
        assert!(backend.requests_to(Endpoint::ErrorLogRate).is_empty());
    }

    #[test]
    fn test_from_config() {
        let client = ApiClient::from_config(Config::default()).unwrap();
        assert_eq!(client.config().backend, "http://localhost:16800");
    }
}
