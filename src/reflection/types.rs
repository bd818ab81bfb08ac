//! 反思记录类型与确定性指标提取
//!
//! 数值字段（时长、百分比、计数）一律在任何生成步骤之前从 MetricsSummary 直接拷贝，
//! 生成步骤只负责叙述字段。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{TaskFailure, TaskState};
use crate::mode::Mode;
use crate::monitor::MetricsSummary;

/// 叙述部分由哪一档产出
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionTier {
    SchemaGuided,
    ManualParse,
    Minimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Seconds,
    Percent,
    Count,
}

/// 带单位的数值字段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricField {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
}

impl MetricField {
    fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
        }
    }
}

/// 可选的改进提议
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub description: String,
    pub impact: Option<String>,
}

/// 一次执行的反思记录
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReflectionEntry {
    pub trace_id: String,
    pub final_state: TaskState,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
    pub rationale: Option<String>,
    pub metrics: Vec<MetricField>,
    pub proposed_change: Option<ProposedChange>,
    pub tier: ReflectionTier,
}

impl ReflectionEntry {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }
}

/// 生成反思所需的执行元数据
#[derive(Clone, Debug)]
pub struct ReflectionInput {
    pub trace_id: String,
    pub request: String,
    pub final_state: TaskState,
    /// 实际走过的执行分支（HANDLE_DIRECT / TOOL_CALL / MODEL_DELEGATE）
    pub route: Option<TaskState>,
    pub reply: Option<String>,
    pub error: Option<TaskFailure>,
    pub mode: Mode,
    pub summary: MetricsSummary,
}

/// 从 MetricsSummary 确定性地提取数值字段；无数据的聚合值不输出
pub fn extract_metric_fields(summary: &MetricsSummary) -> Vec<MetricField> {
    let mut fields = vec![
        MetricField::new("duration_seconds", summary.duration_seconds, MetricUnit::Seconds),
        MetricField::new("sample_count", summary.sample_count as f64, MetricUnit::Count),
    ];
    for (metric, agg) in summary.aggregates() {
        let prefix = metric.trim_end_matches("_percent");
        for (suffix, value) in [("min", agg.min), ("max", agg.max), ("avg", agg.avg)] {
            if let Some(v) = value {
                fields.push(MetricField::new(format!("{prefix}_{suffix}"), v, MetricUnit::Percent));
            }
        }
    }
    fields.push(MetricField::new(
        "violation_count",
        summary.violations.len() as f64,
        MetricUnit::Count,
    ));
    fields
}
