use crate::api::ApiClient;
use crate::config::JobInfo;
use crate::extension::SpiderExtension;
use async_trait::async_trait;
use log::debug;

/// Registers the job's alerting rule for the lifetime of the spider
///
/// The rule tells the backend how often to check the job and which error
/// rate and memory limits should raise an alert. It is removed again when
/// the spider closes, whatever the reason.
pub struct MonitorRuleExtension {
    job: JobInfo,
    api: ApiClient,
    enabled: bool,
}

impl MonitorRuleExtension {
    pub fn new(job: JobInfo, api: ApiClient) -> Self {
        let enabled = api.config().enable_monitor_rule;
        Self { job, api, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl SpiderExtension for MonitorRuleExtension {
    fn name(&self) -> &str {
        "MonitorRuleExtension"
    }

    async fn spider_opened(&self) {
        if !self.enabled {
            debug!("Monitor rule disabled for job {}", self.job.job_id);
            return;
        }
        self.api.add_monitor_rule(&self.job).await;
    }

    async fn spider_closed(&self, _reason: &str) {
        if !self.enabled {
            return;
        }
        self.api.del_monitor_rule(&self.job.job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiRequest, MockBackend};
    use crate::config::Config;
    use std::sync::Arc;

    fn extension(config: Config) -> (MonitorRuleExtension, MockBackend) {
        let backend = MockBackend::success();
        let api = ApiClient::new(Arc::new(backend.clone()), config);
        let job = JobInfo::new("news", "articles", "job-11").with_host("crawler-05");
        (MonitorRuleExtension::new(job, api), backend)
    }

    #[tokio::test]
    async fn test_registers_and_removes_rule() {
        let (extension, backend) = extension(Config::default());

        extension.spider_opened().await;
        extension.spider_closed("finished").await;

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        match &requests[0] {
            ApiRequest::AddMonitorRule(rule) => {
                assert_eq!(rule.spider_job_id, "job-11");
                assert_eq!(rule.spider_host, "crawler-05");
            }
            other => panic!("Expected AddMonitorRule, got {:?}", other),
        }
        match &requests[1] {
            ApiRequest::DelMonitorRule(removal) => assert_eq!(removal.spider_job_id, "job-11"),
            other => panic!("Expected DelMonitorRule, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_rule_sends_nothing() {
        let config = Config {
            enable_monitor_rule: false,
            ..Config::default()
        };
        let (extension, backend) = extension(config);

        assert!(!extension.is_enabled());
        extension.spider_opened().await;
        extension.spider_closed("shutdown").await;

        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_does_not_propagate() {
        let backend = MockBackend::failing("503");
        let api = ApiClient::new(Arc::new(backend.clone()), Config::default());
        let extension = MonitorRuleExtension::new(JobInfo::new("p", "s", "j"), api);

        extension.spider_opened().await;
        extension.spider_closed("finished").await;

        assert_eq!(backend.call_count(), 2);
    }
}
