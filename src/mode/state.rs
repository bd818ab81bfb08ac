//! 模式定义：Mode、ModeState 快照、迁移记录与各模式阈值

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensors::{ACCELERATOR_PERCENT, CPU_PERCENT, MEMORY_PERCENT};

/// 系统运行姿态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Normal,
    Alert,
    Degraded,
    Lockdown,
    Recovery,
}

impl Mode {
    /// 迁移图：只允许这些边
    pub fn can_transition_to(&self, next: Mode) -> bool {
        use Mode::{Alert, Degraded, Lockdown, Normal, Recovery};
        match (self, next) {
            (Lockdown, Lockdown) => false,
            (_, Lockdown) => true,
            (Normal, Alert) => true,
            (Alert, Degraded) | (Alert, Normal) => true,
            (Degraded, Recovery) => true,
            (Recovery, Normal) => true,
            (Lockdown, Recovery) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "NORMAL",
            Mode::Alert => "ALERT",
            Mode::Degraded => "DEGRADED",
            Mode::Lockdown => "LOCKDOWN",
            Mode::Recovery => "RECOVERY",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 触发迁移的指标及观测值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerMetric {
    pub metric: String,
    pub value: f64,
}

/// 当前模式快照（只读副本）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModeState {
    pub mode: Mode,
    pub reason: Option<String>,
    pub triggers: Vec<TriggerMetric>,
    pub since: DateTime<Utc>,
}

impl ModeState {
    pub fn initial() -> Self {
        Self {
            mode: Mode::Normal,
            reason: None,
            triggers: Vec::new(),
            since: Utc::now(),
        }
    }
}

/// 一次模式迁移的审计记录（用于阈值调优）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
    pub reason: String,
    pub triggers: Vec<TriggerMetric>,
    pub at: DateTime<Utc>,
}

/// 单个模式下的指标上限（百分比）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub accelerator_percent: f64,
}

impl ThresholdSet {
    pub const fn new(cpu_percent: f64, memory_percent: f64, accelerator_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            accelerator_percent,
        }
    }

    /// 按指标名取上限；未知指标不设上限
    pub fn ceiling(&self, metric: &str) -> Option<f64> {
        match metric {
            CPU_PERCENT => Some(self.cpu_percent),
            MEMORY_PERCENT => Some(self.memory_percent),
            ACCELERATOR_PERCENT => Some(self.accelerator_percent),
            _ => None,
        }
    }
}

/// 各模式阈值（[mode.thresholds.*]）
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeThresholds {
    pub normal: ThresholdSet,
    pub alert: ThresholdSet,
    pub degraded: ThresholdSet,
    pub lockdown: ThresholdSet,
    pub recovery: ThresholdSet,
}

impl ModeThresholds {
    pub fn for_mode(&self, mode: Mode) -> &ThresholdSet {
        match mode {
            Mode::Normal => &self.normal,
            Mode::Alert => &self.alert,
            Mode::Degraded => &self.degraded,
            Mode::Lockdown => &self.lockdown,
            Mode::Recovery => &self.recovery,
        }
    }

    /// 所有模式使用同一组阈值
    pub fn uniform(set: ThresholdSet) -> Self {
        Self {
            normal: set,
            alert: set,
            degraded: set,
            lockdown: set,
            recovery: set,
        }
    }
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            normal: ThresholdSet::new(85.0, 90.0, 95.0),
            alert: ThresholdSet::new(80.0, 85.0, 90.0),
            degraded: ThresholdSet::new(75.0, 80.0, 85.0),
            lockdown: ThresholdSet::new(75.0, 80.0, 85.0),
            recovery: ThresholdSet::new(70.0, 75.0, 80.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_graph_edges() {
        assert!(Mode::Normal.can_transition_to(Mode::Alert));
        assert!(Mode::Alert.can_transition_to(Mode::Degraded));
        assert!(Mode::Alert.can_transition_to(Mode::Normal));
        assert!(Mode::Degraded.can_transition_to(Mode::Recovery));
        assert!(Mode::Recovery.can_transition_to(Mode::Normal));
        assert!(Mode::Lockdown.can_transition_to(Mode::Recovery));
        for m in [Mode::Normal, Mode::Alert, Mode::Degraded, Mode::Recovery] {
            assert!(m.can_transition_to(Mode::Lockdown));
        }
    }

    #[test]
    fn test_forbidden_edges() {
        assert!(!Mode::Lockdown.can_transition_to(Mode::Normal));
        assert!(!Mode::Normal.can_transition_to(Mode::Degraded));
        assert!(!Mode::Degraded.can_transition_to(Mode::Normal));
        assert!(!Mode::Recovery.can_transition_to(Mode::Degraded));
        assert!(!Mode::Lockdown.can_transition_to(Mode::Lockdown));
    }

    #[test]
    fn test_ceiling_lookup() {
        let t = ModeThresholds::default();
        assert_eq!(t.for_mode(Mode::Alert).ceiling(CPU_PERCENT), Some(80.0));
        assert_eq!(t.for_mode(Mode::Normal).ceiling("disk_percent"), None);
    }
}
