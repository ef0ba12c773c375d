use crate::config::Config;
use crate::error::ApiError;
use crate::payloads::{ErrorLogRecord, ErrorRateReport, MonitorRule, MonitorRuleRemoval, StatsReport};
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Future returned by [`Backend::send`], resolving to the response body
pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send + 'a>>;

/// Backend resources this crate talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    SpiderStats,
    ErrorLogRate,
    ErrorLogContent,
    MonitorRules,
}

impl Endpoint {
    /// Path relative to the backend base URL
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::SpiderStats => "/api/v1/scrapyd/spiderStats/",
            Endpoint::ErrorLogRate => "/api/v1/logs/errorLogRate/",
            Endpoint::ErrorLogContent => "/api/v1/logs/errorLogContent/",
            Endpoint::MonitorRules => "/api/v1/schedule/monitorRules/",
        }
    }
}

/// A single call to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    SendStats(StatsReport),
    SendErrlogRate(ErrorRateReport),
    SendErrlogContent(Vec<ErrorLogRecord>),
    AddMonitorRule(MonitorRule),
    DelMonitorRule(MonitorRuleRemoval),
}

impl ApiRequest {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            ApiRequest::SendStats(_) => Endpoint::SpiderStats,
            ApiRequest::SendErrlogRate(_) => Endpoint::ErrorLogRate,
            ApiRequest::SendErrlogContent(_) => Endpoint::ErrorLogContent,
            ApiRequest::AddMonitorRule(_) | ApiRequest::DelMonitorRule(_) => {
                Endpoint::MonitorRules
            }
        }
    }

    /// Whether the request uses `DELETE` instead of `POST`
    pub fn is_delete(&self) -> bool {
        matches!(self, ApiRequest::DelMonitorRule(_))
    }

    /// Name of the client operation, used in failure logs
    pub fn operation(&self) -> &'static str {
        match self {
            ApiRequest::SendStats(_) => "send_stats_data",
            ApiRequest::SendErrlogRate(_) => "send_errlog_rate",
            ApiRequest::SendErrlogContent(_) => "send_errlog_content",
            ApiRequest::AddMonitorRule(_) => "add_monitor_rule",
            ApiRequest::DelMonitorRule(_) => "del_monitor_rule",
        }
    }

    /// JSON body of the request
    pub fn body(&self) -> Result<Value, ApiError> {
        let value = match self {
            ApiRequest::SendStats(report) => serde_json::to_value(report)?,
            ApiRequest::SendErrlogRate(report) => serde_json::to_value(report)?,
            ApiRequest::SendErrlogContent(records) => serde_json::to_value(records)?,
            ApiRequest::AddMonitorRule(rule) => serde_json::to_value(rule)?,
            ApiRequest::DelMonitorRule(removal) => serde_json::to_value(removal)?,
        };
        Ok(value)
    }
}

/// Transport for backend calls
pub trait Backend: Send + Sync {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BackendFuture<'a>;
}

/// Backend reached over HTTP with token authentication
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpBackend {
    /// Create an HTTP backend
    ///
    /// # Arguments
    /// * `base_url` - Backend address (e.g., "http://localhost:16800")
    /// * `api_token` - Token sent as `Authorization: Token <api_token>`
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: String, api_token: String, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(
            config.backend.clone(),
            config.api_token.clone(),
            config.request_timeout_duration(),
        )
    }

    /// Full URL of an endpoint
    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint.path())
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.api_token)
    }
}

impl Backend for HttpBackend {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            let body = request.body()?;
            let url = self.url(request.endpoint());

            let builder = if request.is_delete() {
                self.client.delete(&url)
            } else {
                self.client.post(&url)
            };

            let response = builder
                .header("Content-Type", "application/json")
                .header("Authorization", self.authorization())
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());

            if !status.is_success() {
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }

            Ok(text)
        })
    }
}

/// Backend that records calls instead of sending them
///
/// Used by tests. Every request is kept, in order, whether it succeeds or not.
#[derive(Clone, Default)]
pub struct MockBackend {
    requests: Arc<Mutex<Vec<ApiRequest>>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl MockBackend {
    /// Mock that accepts every request
    pub fn success() -> Self {
        Self::default()
    }

    /// Mock that fails every request with the given message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Delay every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Copy of all recorded requests
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recorded requests sent to one endpoint
    pub fn requests_to(&self, endpoint: Endpoint) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.endpoint() == endpoint)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn reset(&self) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Backend for MockBackend {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match &self.failure {
                Some(message) => Err(ApiError::Mock(message.clone())),
                None => Ok(format!("{{\"ok\": true, \"operation\": \"{}\"}}", request.operation())),
            }
        })
    }
}
