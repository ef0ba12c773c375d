use thiserror::Error;

/// Errors that can occur when talking to the monitoring backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Mock backend failure: {0}")]
    Mock(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Encode(err.to_string())
    }
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur while wiring telemetry into a crawl
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Failed to install log handler: {0}")]
    SetLogger(String),

    #[error("API client error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = ApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned status 502: bad gateway");
    }

    #[test]
    fn test_config_error_from_toml() {
        let parse: Result<toml::Value, toml::de::Error> = toml::from_str("backend = ");
        let err: ConfigError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("TOML parse error"));
    }
}
