//! 可控指标源（用于测试与无 /proc 的环境，无需真实硬件）
//!
//! 按组返回预设读数，统计每组被轮询的次数；可设置延迟与失败组。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::sensors::{
    MetricGroup, MetricSource, SensorError, SensorReading, ACCELERATOR_PERCENT, CPU_PERCENT,
    MEMORY_PERCENT,
};

/// 计数指标源
#[derive(Debug)]
pub struct CountingSource {
    readings: Mutex<HashMap<MetricGroup, SensorReading>>,
    failing: Mutex<HashSet<MetricGroup>>,
    polls: Mutex<HashMap<MetricGroup, u64>>,
    delay: Duration,
}

impl Default for CountingSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingSource {
    /// 默认读数：cpu 12%、memory 40%、accelerator 5%
    pub fn new() -> Self {
        let mut readings = HashMap::new();
        readings.insert(
            MetricGroup::Host,
            SensorReading::new().with(CPU_PERCENT, 12.0).with(MEMORY_PERCENT, 40.0),
        );
        readings.insert(
            MetricGroup::Accelerator,
            SensorReading::new().with(ACCELERATOR_PERCENT, 5.0),
        );
        Self {
            readings: Mutex::new(readings),
            failing: Mutex::new(HashSet::new()),
            polls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, group: MetricGroup) -> Self {
        self.set_failing(group, true);
        self
    }

    pub fn set_failing(&self, group: MetricGroup, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|p| p.into_inner());
        if failing {
            set.insert(group);
        } else {
            set.remove(&group);
        }
    }

    pub fn set_reading(&self, group: MetricGroup, reading: SensorReading) {
        self.readings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(group, reading);
    }

    pub fn polls(&self, group: MetricGroup) -> u64 {
        self.polls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&group)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl MetricSource for CountingSource {
    async fn poll(&self, group: MetricGroup) -> Result<SensorReading, SensorError> {
        *self
            .polls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(group)
            .or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&group)
        {
            return Err(SensorError::Unavailable(format!("{group} disabled")));
        }
        self.readings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&group)
            .cloned()
            .ok_or_else(|| SensorError::Unavailable(format!("no reading for {group}")))
    }
}
