//! 监控样本与汇总：MetricSample、MetricAggregate、MetricsSummary
//!
//! MetricsSummary 只在监控停止时计算一次；零样本时各聚合值为 None，但摘要本身总存在。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mode::{Mode, ThresholdSet};
use crate::sensors::source::round2;
use crate::sensors::{ACCELERATOR_PERCENT, CPU_PERCENT, MEMORY_PERCENT};

/// 超出当时模式阈值的一次观测
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    /// 采样时生效的模式
    pub mode: Mode,
    pub at: DateTime<Utc>,
}

/// 单次采样（记录后不可变）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSample {
    pub trace_id: String,
    pub at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
    pub mode: Mode,
    pub violations: Vec<ThresholdViolation>,
}

impl MetricSample {
    /// 按采样时模式的阈值判定越线
    pub fn new(
        trace_id: impl Into<String>,
        values: BTreeMap<String, f64>,
        mode: Mode,
        thresholds: &ThresholdSet,
    ) -> Self {
        let at = Utc::now();
        let violations = values
            .iter()
            .filter_map(|(name, &value)| {
                let ceiling = thresholds.ceiling(name)?;
                (value > ceiling).then(|| ThresholdViolation {
                    metric: name.clone(),
                    value,
                    threshold: ceiling,
                    mode,
                    at,
                })
            })
            .collect();
        Self {
            trace_id: trace_id.into(),
            at,
            values,
            mode,
            violations,
        }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// 单个指标的 min / max / avg；无数据时全为 None
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

impl MetricAggregate {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        Self {
            min: Some(round2(min)),
            max: Some(round2(max)),
            avg: Some(round2(avg)),
        }
    }

    pub fn single(value: f64) -> Self {
        Self::from_values(&[value])
    }

    pub fn is_empty(&self) -> bool {
        self.avg.is_none()
    }
}

/// 一次任务的资源使用汇总
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub duration_seconds: f64,
    pub sample_count: usize,
    pub cpu: MetricAggregate,
    pub memory: MetricAggregate,
    pub accelerator: MetricAggregate,
    pub violations: Vec<ThresholdViolation>,
}

impl MetricsSummary {
    pub fn empty(duration_seconds: f64) -> Self {
        Self {
            duration_seconds: round2(duration_seconds),
            sample_count: 0,
            cpu: MetricAggregate::default(),
            memory: MetricAggregate::default(),
            accelerator: MetricAggregate::default(),
            violations: Vec::new(),
        }
    }

    pub fn from_samples(samples: &[MetricSample], duration: Duration) -> Self {
        let collect = |metric: &str| -> Vec<f64> {
            samples.iter().filter_map(|s| s.get(metric)).collect()
        };
        Self {
            duration_seconds: round2(duration.as_secs_f64()),
            sample_count: samples.len(),
            cpu: MetricAggregate::from_values(&collect(CPU_PERCENT)),
            memory: MetricAggregate::from_values(&collect(MEMORY_PERCENT)),
            accelerator: MetricAggregate::from_values(&collect(ACCELERATOR_PERCENT)),
            violations: samples
                .iter()
                .flat_map(|s| s.violations.iter().cloned())
                .collect(),
        }
    }

    /// (指标名, 聚合值)，顺序固定
    pub fn aggregates(&self) -> impl Iterator<Item = (&'static str, &MetricAggregate)> {
        [
            (CPU_PERCENT, &self.cpu),
            (MEMORY_PERCENT, &self.memory),
            (ACCELERATOR_PERCENT, &self.accelerator),
        ]
        .into_iter()
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeThresholds;

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_single_sample_summary() {
        let thresholds = ModeThresholds::default();
        let sample = MetricSample::new(
            "t-1",
            values(&[(CPU_PERCENT, 11.9), (MEMORY_PERCENT, 54.0)]),
            Mode::Normal,
            thresholds.for_mode(Mode::Normal),
        );
        let summary = MetricsSummary::from_samples(&[sample], Duration::from_millis(7200));
        assert_eq!(summary.duration_seconds, 7.2);
        assert_eq!(summary.sample_count, 1);
        assert_eq!(summary.cpu.avg, Some(11.9));
        assert_eq!(summary.memory.avg, Some(54.0));
        assert!(summary.accelerator.is_empty());
        assert!(summary.violations.is_empty());
    }

    #[test]
    fn test_zero_samples_null_aggregates() {
        let summary = MetricsSummary::from_samples(&[], Duration::from_secs(2));
        assert_eq!(summary.sample_count, 0);
        assert!(summary
            .aggregates()
            .all(|(_, a)| a.min.is_none() && a.max.is_none() && a.avg.is_none()));
    }

    #[test]
    fn test_violation_uses_mode_at_sample_time() {
        let thresholds = ModeThresholds::default();
        // 82% 在 NORMAL（85）下不越线，在 ALERT（80）下越线
        let v = values(&[(CPU_PERCENT, 82.0)]);
        let normal =
            MetricSample::new("t", v.clone(), Mode::Normal, thresholds.for_mode(Mode::Normal));
        let alert = MetricSample::new("t", v, Mode::Alert, thresholds.for_mode(Mode::Alert));
        assert!(normal.violations.is_empty());
        assert_eq!(alert.violations.len(), 1);
        assert_eq!(alert.violations[0].threshold, 80.0);

        let summary = MetricsSummary::from_samples(&[normal, alert], Duration::from_secs(10));
        assert_eq!(summary.violations.len(), 1);
        assert_eq!(summary.cpu.min, Some(82.0));
    }

    #[test]
    fn test_aggregate_min_max_avg() {
        let agg = MetricAggregate::from_values(&[10.0, 20.0, 33.0]);
        assert_eq!(agg.min, Some(10.0));
        assert_eq!(agg.max, Some(33.0));
        assert_eq!(agg.avg, Some(21.0));
    }
}
