//! 传感器数据源：MetricSource trait 与基于 /proc、nvidia-smi 的实现
//!
//! 每次 poll 都是「昂贵」调用（尤其加速器），调用方应通过 SensorCache 读取而非直接调用。

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

pub const CPU_PERCENT: &str = "cpu_percent";
pub const MEMORY_PERCENT: &str = "memory_percent";
pub const ACCELERATOR_PERCENT: &str = "accelerator_percent";

/// 指标组：缓存按组独立存放，一组失败不影响另一组
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    /// cpu% + memory%
    Host,
    /// 加速器利用率%
    Accelerator,
}

impl MetricGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricGroup::Host => "host",
            MetricGroup::Accelerator => "accelerator",
        }
    }
}

impl std::fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次轮询得到的指标值（名称 → 数值）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub values: BTreeMap<String, f64>,
}

impl SensorReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("I/O error reading {source_name}: {message}")]
    Io { source_name: String, message: String },

    #[error("Unparsable sensor output: {0}")]
    Parse(String),

    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Sensor poll timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// 昂贵指标源
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn poll(&self, group: MetricGroup) -> Result<SensorReading, SensorError>;
}

/// Linux 主机指标：/proc/stat（CPU 忙碌率，取两次轮询差值）、/proc/meminfo；加速器走 nvidia-smi
#[derive(Debug, Default)]
pub struct ProcfsSource {
    /// 上一次 /proc/stat 的 (busy, total) 累计值
    last_cpu: Mutex<Option<(u64, u64)>>,
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read_host(&self) -> Result<SensorReading, SensorError> {
        let stat = read_proc("/proc/stat").await?;
        let (busy, total) = parse_cpu_totals(&stat)?;
        let cpu = {
            let mut last = self
                .last_cpu
                .lock()
                .map_err(|_| SensorError::Unavailable("cpu counter lock poisoned".into()))?;
            let (prev_busy, prev_total) = last.unwrap_or((0, 0));
            *last = Some((busy, total));
            let d_total = total.saturating_sub(prev_total);
            let d_busy = busy.saturating_sub(prev_busy);
            if d_total == 0 {
                0.0
            } else {
                d_busy as f64 / d_total as f64 * 100.0
            }
        };

        let meminfo = read_proc("/proc/meminfo").await?;
        let memory = parse_memory_percent(&meminfo)?;

        Ok(SensorReading::new()
            .with(CPU_PERCENT, round2(cpu))
            .with(MEMORY_PERCENT, round2(memory)))
    }

    async fn read_accelerator(&self) -> Result<SensorReading, SensorError> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
            .output()
            .await
            .map_err(|e| SensorError::Unavailable(format!("nvidia-smi: {e}")))?;
        if !output.status.success() {
            return Err(SensorError::Unavailable(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let util = parse_accelerator_utilization(&stdout)?;
        Ok(SensorReading::new().with(ACCELERATOR_PERCENT, round2(util)))
    }
}

#[async_trait]
impl MetricSource for ProcfsSource {
    async fn poll(&self, group: MetricGroup) -> Result<SensorReading, SensorError> {
        match group {
            MetricGroup::Host => self.read_host().await,
            MetricGroup::Accelerator => self.read_accelerator().await,
        }
    }
}

async fn read_proc(path: &str) -> Result<String, SensorError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SensorError::Io {
            source_name: path.to_string(),
            message: e.to_string(),
        })
}

/// 解析 /proc/stat 首行 `cpu  user nice system idle iowait irq softirq steal ...`，返回 (busy, total)
fn parse_cpu_totals(stat: &str) -> Result<(u64, u64), SensorError> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| SensorError::Parse("no aggregate cpu line in /proc/stat".into()))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|e| SensorError::Parse(format!("/proc/stat: {e}")))?;
    if fields.len() < 4 {
        return Err(SensorError::Parse("/proc/stat: too few cpu fields".into()));
    }
    // guest/guest_nice 已计入 user/nice
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok((total.saturating_sub(idle), total))
}

fn parse_memory_percent(meminfo: &str) -> Result<f64, SensorError> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };
    let total = field("MemTotal:").ok_or_else(|| SensorError::Parse("MemTotal missing".into()))?;
    let available = field("MemAvailable:")
        .ok_or_else(|| SensorError::Parse("MemAvailable missing".into()))?;
    if total <= 0.0 {
        return Err(SensorError::Parse("MemTotal is zero".into()));
    }
    Ok((1.0 - available / total) * 100.0)
}

/// 多卡时取平均
fn parse_accelerator_utilization(stdout: &str) -> Result<f64, SensorError> {
    let values: Vec<f64> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse::<f64>()
                .map_err(|e| SensorError::Parse(format!("nvidia-smi '{l}': {e}")))
        })
        .collect::<Result<_, _>>()?;
    if values.is_empty() {
        return Err(SensorError::Unavailable("no accelerator reported".into()));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_totals() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let (busy, total) = parse_cpu_totals(stat).unwrap();
        assert_eq!(total, 1000);
        assert_eq!(busy, 150);
    }

    #[test]
    fn test_parse_memory_percent() {
        let meminfo = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let pct = parse_memory_percent(meminfo).unwrap();
        assert!((pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_memory_missing_field() {
        assert!(matches!(
            parse_memory_percent("MemTotal: 100 kB\n"),
            Err(SensorError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_accelerator_averages_devices() {
        assert_eq!(parse_accelerator_utilization("40\n60\n").unwrap(), 50.0);
        assert!(parse_accelerator_utilization("\n").is_err());
        assert!(parse_accelerator_utilization("N/A\n").is_err());
    }
}
