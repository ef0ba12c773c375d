/// Monitor rule registration for a running job
pub mod monitor_rule;

pub use monitor_rule::MonitorRuleExtension;
