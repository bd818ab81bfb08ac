//! 请求级资源监控：每个在途任务一个实例
//!
//! start() 启动后台采样任务（按间隔经 SensorCache 读取，样本打上 trace_id）；
//! stop() 取消并等待任务真正结束后才计算 MetricsSummary，保证 stop 返回后不会再记录样本。
//! 单次采样失败只记日志，循环继续；监控失败对执行器不可见。

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorSection;
use crate::mode::{ModeHandle, ModeThresholds};
use crate::monitor::{MetricSample, MetricsSummary};
use crate::sensors::{MetricGroup, SensorCache, SensorError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Monitor for trace {0} already started")]
    AlreadyStarted(String),
}

/// 监控参数
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub enabled: bool,
    pub interval: Duration,
}

impl From<&MonitorSection> for MonitorOptions {
    fn from(cfg: &MonitorSection) -> Self {
        Self {
            enabled: cfg.enabled,
            interval: cfg.poll_interval(),
        }
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&MonitorSection::default())
    }
}

enum Phase {
    Idle,
    Running {
        started_at: Instant,
        token: CancellationToken,
        /// 禁用监控时为 None
        handle: Option<JoinHandle<Vec<MetricSample>>>,
    },
    Stopped(MetricsSummary),
}

/// 采样任务需要的只读上下文
struct Sampler {
    trace_id: String,
    cache: Arc<SensorCache>,
    mode: ModeHandle,
    thresholds: ModeThresholds,
}

/// 资源监控器
pub struct ResourceMonitor {
    trace_id: String,
    cache: Arc<SensorCache>,
    mode: ModeHandle,
    thresholds: ModeThresholds,
    options: MonitorOptions,
    phase: Phase,
}

impl ResourceMonitor {
    pub fn new(
        trace_id: impl Into<String>,
        cache: Arc<SensorCache>,
        mode: ModeHandle,
        thresholds: ModeThresholds,
        options: MonitorOptions,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            cache,
            mode,
            thresholds,
            options,
            phase: Phase::Idle,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// 启动后台采样（不阻塞）；每个实例只能启动一次
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(MonitorError::AlreadyStarted(self.trace_id.clone()));
        }
        let token = CancellationToken::new();
        let handle = if self.options.enabled {
            let sampler = Sampler {
                trace_id: self.trace_id.clone(),
                cache: self.cache.clone(),
                mode: self.mode.clone(),
                thresholds: self.thresholds,
            };
            Some(tokio::spawn(sampling_loop(
                sampler,
                self.options.interval,
                token.clone(),
            )))
        } else {
            None
        };
        tracing::debug!(
            trace_id = %self.trace_id,
            enabled = self.options.enabled,
            "monitor started"
        );
        self.phase = Phase::Running {
            started_at: Instant::now(),
            token,
            handle,
        };
        Ok(())
    }

    /// 停止并返回汇总；重复调用返回同一份汇总
    pub async fn stop(&mut self) -> MetricsSummary {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Stopped(summary) => {
                self.phase = Phase::Stopped(summary.clone());
                summary
            }
            Phase::Idle => {
                let summary = MetricsSummary::empty(0.0);
                self.phase = Phase::Stopped(summary.clone());
                summary
            }
            Phase::Running {
                started_at,
                token,
                handle,
            } => {
                token.cancel();
                let samples = match handle {
                    Some(handle) => match handle.await {
                        Ok(samples) => samples,
                        Err(e) => {
                            tracing::warn!(
                                trace_id = %self.trace_id,
                                error = %e,
                                "monitor task ended abnormally"
                            );
                            Vec::new()
                        }
                    },
                    None => Vec::new(),
                };
                let summary = MetricsSummary::from_samples(&samples, started_at.elapsed());
                tracing::debug!(
                    trace_id = %self.trace_id,
                    samples = summary.sample_count,
                    duration_seconds = summary.duration_seconds,
                    violations = summary.violations.len(),
                    "monitor stopped"
                );
                self.phase = Phase::Stopped(summary.clone());
                summary
            }
        }
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Phase::Running { token, handle, .. } = &self.phase {
            tracing::warn!(trace_id = %self.trace_id, "monitor dropped while running, cancelling");
            token.cancel();
            if let Some(h) = handle {
                h.abort();
            }
        }
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            Phase::Idle => "idle",
            Phase::Running { .. } => "running",
            Phase::Stopped(_) => "stopped",
        };
        f.debug_struct("ResourceMonitor")
            .field("trace_id", &self.trace_id)
            .field("options", &self.options)
            .field("phase", &phase)
            .finish()
    }
}

async fn sampling_loop(
    sampler: Sampler,
    interval: Duration,
    token: CancellationToken,
) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    let mut accelerator = true;
    // 首个样本在一个间隔之后
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let tick = AssertUnwindSafe(sampler.take_sample(&mut accelerator)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            outcome = tick => outcome,
        };

        match outcome {
            Ok(Ok(sample)) => {
                tracing::debug!(
                    trace_id = %sample.trace_id,
                    mode = %sample.mode,
                    values = ?sample.values,
                    violations = sample.violations.len(),
                    "monitor sample"
                );
                samples.push(sample);
            }
            Ok(Err(e)) => {
                tracing::warn!(trace_id = %sampler.trace_id, error = %e, "monitor tick failed");
            }
            Err(_) => {
                tracing::warn!(trace_id = %sampler.trace_id, "monitor tick panicked");
            }
        }
    }
    samples
}

impl Sampler {
    async fn take_sample(&self, accelerator: &mut bool) -> Result<MetricSample, SensorError> {
        let mut values: BTreeMap<String, f64> = self.cache.get(MetricGroup::Host).await?.values;
        if *accelerator {
            match self.cache.get(MetricGroup::Accelerator).await {
                Ok(reading) => values.extend(reading.values),
                Err(SensorError::Unavailable(msg)) => {
                    // 本次监控内不再尝试
                    tracing::debug!(
                        trace_id = %self.trace_id,
                        reason = %msg,
                        "accelerator metrics unavailable"
                    );
                    *accelerator = false;
                }
                Err(e) => {
                    tracing::debug!(
                        trace_id = %self.trace_id,
                        error = %e,
                        "accelerator poll failed"
                    );
                }
            }
        }
        let mode = self.mode.mode();
        Ok(MetricSample::new(
            self.trace_id.clone(),
            values,
            mode,
            self.thresholds.for_mode(mode),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{Mode, ModeController};
    use crate::sensors::{CountingSource, SensorReading, CPU_PERCENT, MEMORY_PERCENT};

    fn setup(options: MonitorOptions) -> (Arc<CountingSource>, ModeController, ResourceMonitor) {
        let source = Arc::new(CountingSource::new());
        let cache = Arc::new(SensorCache::new(
            source.clone(),
            Duration::from_secs(10),
            Duration::from_secs(5),
        ));
        let controller = ModeController::default();
        let monitor = ResourceMonitor::new(
            "trace-1",
            cache,
            controller.handle(),
            ModeThresholds::default(),
            options,
        );
        (source, controller, monitor)
    }

    fn every(secs: u64) -> MonitorOptions {
        MonitorOptions {
            enabled: true,
            interval: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_on_interval() {
        let (_source, _c, mut monitor) = setup(every(5));
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.duration_seconds, 12.0);
        assert_eq!(summary.cpu.avg, Some(12.0));
        assert_eq!(summary.memory.avg, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_task_zero_samples() {
        let (_source, _c, mut monitor) = setup(every(5));
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 0);
        assert!(summary.cpu.avg.is_none());
        assert_eq!(summary.duration_seconds, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_drained() {
        let (source, _c, mut monitor) = setup(every(5));
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let first = monitor.stop().await;
        let polls = source.polls(MetricGroup::Host);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let second = monitor.stop().await;
        assert_eq!(first, second);
        assert_eq!(source.polls(MetricGroup::Host), polls);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let (_source, _c, mut monitor) = setup(every(5));
        monitor.start().unwrap();
        assert_eq!(
            monitor.start(),
            Err(MonitorError::AlreadyStarted("trace-1".to_string()))
        );
        monitor.stop().await;
        assert!(monitor.start().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_failure_is_not_fatal() {
        let (source, _c, mut monitor) = setup(every(5));
        source.set_failing(MetricGroup::Host, true);
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        source.set_failing(MetricGroup::Host, false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accelerator_unavailable_is_skipped() {
        let (source, _c, mut monitor) = setup(every(5));
        source.set_failing(MetricGroup::Accelerator, true);
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(16)).await;
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 3);
        assert!(summary.accelerator.is_empty());
        assert_eq!(source.polls(MetricGroup::Accelerator), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_violations_follow_current_mode() {
        let (source, mut controller, mut monitor) = setup(every(5));
        source.set_reading(
            MetricGroup::Host,
            SensorReading::new().with(CPU_PERCENT, 82.0).with(MEMORY_PERCENT, 40.0),
        );
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        controller.signal_critical("test", vec![]);
        // 缓存 TTL 10s，第二个样本仍读到 82%，但 LOCKDOWN 阈值为 75%
        tokio::time::sleep(Duration::from_secs(5)).await;
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.violations.len(), 1);
        assert_eq!(summary.violations[0].mode, Mode::Lockdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_monitor_still_summarizes() {
        let (source, _c, mut monitor) = setup(MonitorOptions {
            enabled: false,
            interval: Duration::from_secs(5),
        });
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.duration_seconds, 30.0);
        assert_eq!(source.polls(MetricGroup::Host), 0);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let (_source, _c, mut monitor) = setup(every(5));
        let summary = monitor.stop().await;
        assert_eq!(summary.sample_count, 0);
    }
}
