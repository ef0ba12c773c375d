/// Log handler feeding log counters and the error log buffer
pub mod log_handler;

pub use log_handler::{ErrorLogHandler, ForwardLogger};
