//! 监控层：请求级资源采样与汇总

pub mod sampler;
pub mod summary;

pub use sampler::{MonitorError, MonitorOptions, ResourceMonitor};
pub use summary::{MetricAggregate, MetricSample, MetricsSummary, ThresholdViolation};
