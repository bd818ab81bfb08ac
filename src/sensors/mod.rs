//! 传感器层：指标源与共享 TTL 缓存

pub mod cache;
pub mod mock;
pub mod source;

pub use cache::{CacheStats, SensorCache};
pub use mock::CountingSource;
pub use source::{
    MetricGroup, MetricSource, ProcfsSource, SensorError, SensorReading, ACCELERATOR_PERCENT,
    CPU_PERCENT, MEMORY_PERCENT,
};
