//! 传感器缓存：按指标组的 TTL 缓存，防止缓存击穿
//!
//! 每个指标组一把异步锁，持锁跨越「检查 → 轮询 → 写入」全过程：同一组的第二个并发调用方
//! 在锁上等待，拿到锁后直接命中第一个调用方刚写入的条目，不会重复发起昂贵轮询。
//! 不同组互不阻塞；某组轮询失败不写入、不清除该组旧条目，也不影响其他组。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CacheSection;
use crate::sensors::{MetricGroup, MetricSource, SensorError, SensorReading};

/// 缓存条目：整体替换，读者不会看到写了一半的条目
#[derive(Clone, Debug)]
struct CacheEntry {
    value: SensorReading,
    populated_at: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

/// 命中率等统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 实际发起的昂贵轮询次数（含失败）
    pub polls: u64,
    pub poll_failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 所有调用方共享的传感器缓存（后台监控与同步工具调用）
pub struct SensorCache {
    source: Arc<dyn MetricSource>,
    ttl: Duration,
    poll_timeout: Duration,
    slots: Mutex<HashMap<MetricGroup, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    polls: AtomicU64,
    poll_failures: AtomicU64,
}

impl SensorCache {
    pub fn new(source: Arc<dyn MetricSource>, ttl: Duration, poll_timeout: Duration) -> Self {
        Self {
            source,
            ttl,
            poll_timeout,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
        }
    }

    pub fn from_config(source: Arc<dyn MetricSource>, cfg: &CacheSection) -> Self {
        Self::new(source, cfg.ttl(), cfg.poll_timeout())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, group: MetricGroup) -> Slot {
        // 外层表锁只在取槽位时短暂持有；锁中毒时表内容仍可用
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(group).or_default().clone()
    }

    /// 读取某组指标：未过期则返回缓存副本，否则轮询、写入并返回副本
    pub async fn get(&self, group: MetricGroup) -> Result<SensorReading, SensorError> {
        let slot = self.slot(group);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.populated_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.value.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.polls.fetch_add(1, Ordering::Relaxed);
        let polled = match tokio::time::timeout(self.poll_timeout, self.source.poll(group)).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout(self.poll_timeout)),
        };

        match polled {
            Ok(value) => {
                *entry = Some(CacheEntry {
                    value: value.clone(),
                    populated_at: Instant::now(),
                });
                Ok(value)
            }
            Err(e) => {
                self.poll_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(group = %group, error = %e, "sensor poll failed");
                Err(e)
            }
        }
    }

    /// 丢弃某组缓存，下次读取强制轮询
    pub async fn invalidate(&self, group: MetricGroup) {
        let slot = self.slot(group);
        *slot.lock().await = None;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SensorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorCache")
            .field("ttl", &self.ttl)
            .field("poll_timeout", &self.poll_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}
