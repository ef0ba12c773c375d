//! Wiring of all telemetry pieces for one crawl job
//!
//! [`Telemetry`] owns the backend client, the log handler, and the spider
//! extensions (monitor rule, error rate reporter, stats reporter) and drives
//! them from the two lifecycle calls the crawler makes.

use crate::alerts::MonitorRuleExtension;
use crate::api::{ApiClient, Backend, HttpBackend};
use crate::collectors::{ErrorLogHandler, ForwardLogger};
use crate::config::{Config, JobInfo};
use crate::error::TelemetryError;
use crate::extension::SpiderExtension;
use crate::reporters::{ErrorRateReporter, StatsReporter};
use crate::stats::StatsStore;
use log::{debug, info, warn};
use std::sync::Arc;

/// Builder for [`Telemetry`]
pub struct TelemetryBuilder {
    config: Config,
    job: JobInfo,
    stats: Arc<dyn StatsStore>,
    backend: Option<Arc<dyn Backend>>,
    forward: Option<ForwardLogger>,
}

impl TelemetryBuilder {
    /// Use a specific transport instead of HTTP
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Pass log records on to another logger as well
    pub fn forward_logs_to(mut self, forward: ForwardLogger) -> Self {
        self.forward = Some(forward);
        self
    }

    /// Build the telemetry session
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, when the HTTP client cannot be built,
    /// or outside a tokio runtime.
    pub fn build(self) -> Result<Telemetry, TelemetryError> {
        self.config.validate()?;

        let backend: Arc<dyn Backend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::from_config(&self.config)?),
        };
        let api = ApiClient::new(backend, self.config);

        let log_handler = ErrorLogHandler::with_forward(
            self.job.clone(),
            Arc::clone(&self.stats),
            api.clone(),
            self.forward,
        )?;

        // Opened in this order, closed in reverse
        let extensions: Vec<Box<dyn SpiderExtension>> = vec![
            Box::new(MonitorRuleExtension::new(self.job.clone(), api.clone())),
            Box::new(ErrorRateReporter::new(
                self.job.clone(),
                Arc::clone(&self.stats),
                api.clone(),
            )),
            Box::new(StatsReporter::new(
                self.job.clone(),
                Arc::clone(&self.stats),
                api.clone(),
            )),
        ];

        Ok(Telemetry {
            job: self.job,
            api,
            log_handler,
            extensions,
        })
    }
}

/// Telemetry session for one crawl job
pub struct Telemetry {
    job: JobInfo,
    api: ApiClient,
    log_handler: ErrorLogHandler,
    extensions: Vec<Box<dyn SpiderExtension>>,
}

impl Telemetry {
    pub fn builder(config: Config, job: JobInfo, stats: Arc<dyn StatsStore>) -> TelemetryBuilder {
        TelemetryBuilder {
            config,
            job,
            stats,
            backend: None,
            forward: None,
        }
    }

    pub fn job(&self) -> &JobInfo {
        &self.job
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Handler to register with the logging facade
    pub fn log_handler(&self) -> &ErrorLogHandler {
        &self.log_handler
    }

    /// Register the log handler as the process-wide logger
    pub fn install_log_handler(&self) -> Result<(), TelemetryError> {
        self.log_handler.install()
    }

    /// Names of the registered extensions, in opening order
    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// Spider-open hook
    pub async fn spider_opened(&self) {
        info!(
            "Opening telemetry for {}/{} (job {}, host {})",
            self.job.project, self.job.spider, self.job.job_id, self.job.host
        );
        for extension in &self.extensions {
            debug!("Opening extension {}", extension.name());
            extension.spider_opened().await;
        }
    }

    /// Spider-close hook; flushes buffered error records last
    pub async fn spider_closed(&self, reason: &str) {
        for extension in self.extensions.iter().rev() {
            debug!("Closing extension {}", extension.name());
            extension.spider_closed(reason).await;
        }

        if let Some(send) = self.log_handler.close() {
            if let Err(e) = send.await {
                warn!("Final error log flush did not complete: {}", e);
            }
        }
        info!("Telemetry closed for job {} ({})", self.job.job_id, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiRequest, Endpoint, MockBackend};
    use crate::stats::MemoryStats;
    use chrono::Local;
    use log::{Level, Record};

    fn telemetry(config: Config) -> (Telemetry, MockBackend, Arc<MemoryStats>) {
        let backend = MockBackend::success();
        let stats = Arc::new(MemoryStats::new());
        let telemetry = Telemetry::builder(
            config,
            JobInfo::new("news", "articles", "job-21").with_host("crawler-09"),
            stats.clone(),
        )
        .backend(Arc::new(backend.clone()))
        .build()
        .unwrap();
        (telemetry, backend, stats)
    }

    #[tokio::test]
    async fn test_extension_order() {
        let (telemetry, _backend, _stats) = telemetry(Config::default());
        assert_eq!(
            telemetry.extension_names(),
            vec!["MonitorRuleExtension", "ErrorRateReporter", "StatsReporter"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_session() {
        let (telemetry, backend, stats) = telemetry(Config::default());

        telemetry.spider_opened().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        telemetry.log_handler().handle_at(
            &Record::builder()
                .args(format_args!("parse failed"))
                .level(Level::Error)
                .target("articles")
                .build(),
            Local::now(),
        );
        stats.set_value("item_scraped_count", serde_json::json!(8));

        telemetry.spider_closed("finished").await;

        let requests = backend.requests();
        assert!(matches!(requests.first(), Some(ApiRequest::AddMonitorRule(_))));
        assert!(matches!(
            requests.last(),
            Some(ApiRequest::SendErrlogContent(batch)) if batch.len() == 1
        ));

        // Opening and closing reports from the error rate reporter
        assert_eq!(backend.requests_to(Endpoint::ErrorLogRate).len(), 4);
        // Initial push and the final one with the reason
        let stats_reports = backend.requests_to(Endpoint::SpiderStats);
        assert_eq!(stats_reports.len(), 2);
        match &stats_reports[1] {
            ApiRequest::SendStats(report) => {
                assert_eq!(report.reason.as_deref(), Some("finished"));
                assert_eq!(report.stats["item_scraped_count"], serde_json::json!(8));
            }
            other => panic!("Expected SendStats, got {:?}", other),
        }

        let removals: Vec<_> = requests
            .iter()
            .filter(|r| matches!(r, ApiRequest::DelMonitorRule(_)))
            .collect();
        assert_eq!(removals.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = Config {
            backend: "localhost:16800".to_string(),
            ..Config::default()
        };
        let result = Telemetry::builder(
            config,
            JobInfo::new("p", "s", "j"),
            Arc::new(MemoryStats::new()),
        )
        .build();

        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[tokio::test]
    async fn test_default_backend_is_http() {
        let telemetry = Telemetry::builder(
            Config::default(),
            JobInfo::new("p", "s", "j"),
            Arc::new(MemoryStats::new()),
        )
        .build()
        .unwrap();

        assert_eq!(telemetry.api().config().backend, "http://localhost:16800");
        assert_eq!(telemetry.job().job_id, "j");
    }
}
