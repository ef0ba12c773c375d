/// Monitoring backend client and transports
pub mod backends;
pub mod client;

pub use backends::{ApiRequest, Backend, BackendFuture, Endpoint, HttpBackend, MockBackend};
pub use client::ApiClient;
