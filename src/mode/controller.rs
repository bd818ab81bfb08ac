//! 模式控制器：ModeState 的唯一写入方
//!
//! 写入只经 evaluate_transition（每个任务结束后顺序调用一次）以及带外信号
//! signal_critical / trigger_recovery；其余位置只能通过 ModeHandle 读取快照。
//! 状态经 watch 通道发布，读者拿到的是副本而非可变引用。

use std::collections::VecDeque;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::ModeSection;
use crate::mode::{Mode, ModeState, ModeThresholds, ModeTransition, TriggerMetric};
use crate::monitor::MetricsSummary;

/// 迁移历史保留条数
const HISTORY_CAP: usize = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("Illegal mode transition {from} -> {to}")]
    IllegalTransition { from: Mode, to: Mode },
}

/// 只读模式句柄：供治理组件、监控采样等查询当前模式
#[derive(Clone, Debug)]
pub struct ModeHandle {
    rx: watch::Receiver<ModeState>,
}

impl ModeHandle {
    pub fn mode(&self) -> Mode {
        self.rx.borrow().mode
    }

    pub fn snapshot(&self) -> ModeState {
        self.rx.borrow().clone()
    }

    /// 等待下一次模式变化；控制器已销毁时返回 None
    pub async fn changed(&mut self) -> Option<ModeState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// 模式控制器（每进程一个）
#[derive(Debug)]
pub struct ModeController {
    tx: watch::Sender<ModeState>,
    thresholds: ModeThresholds,
    degrade_after_breaches: u32,
    recovery_after_clear: u32,
    recovery_checks: u32,
    breach_streak: u32,
    clear_streak: u32,
    history: VecDeque<ModeTransition>,
}

impl ModeController {
    pub fn new(cfg: &ModeSection) -> Self {
        let (tx, _rx) = watch::channel(ModeState::initial());
        Self {
            tx,
            thresholds: cfg.thresholds,
            degrade_after_breaches: cfg.degrade_after_breaches.max(1),
            recovery_after_clear: cfg.recovery_after_clear,
            recovery_checks: cfg.recovery_checks.max(1),
            breach_streak: 0,
            clear_streak: 0,
            history: VecDeque::new(),
        }
    }

    pub fn get_mode(&self) -> Mode {
        self.tx.borrow().mode
    }

    pub fn snapshot(&self) -> ModeState {
        self.tx.borrow().clone()
    }

    pub fn handle(&self) -> ModeHandle {
        ModeHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn thresholds(&self) -> &ModeThresholds {
        &self.thresholds
    }

    pub fn history(&self) -> impl Iterator<Item = &ModeTransition> {
        self.history.iter()
    }

    /// 根据一次任务的监控摘要评估迁移；发生迁移时返回记录
    pub fn evaluate_transition(&mut self, summary: &MetricsSummary) -> Option<ModeTransition> {
        let breach = !summary.violations.is_empty();
        let current = self.get_mode();

        let (to, reason, triggers) = match current {
            Mode::Normal if breach => {
                self.breach_streak = 1;
                (Mode::Alert, "threshold breach".to_string(), breach_triggers(summary))
            }
            Mode::Normal => return None,
            Mode::Alert if breach => {
                self.breach_streak += 1;
                if self.breach_streak < self.degrade_after_breaches {
                    return None;
                }
                (
                    Mode::Degraded,
                    format!(
                        "breach persisted for {} consecutive evaluations",
                        self.breach_streak
                    ),
                    breach_triggers(summary),
                )
            }
            Mode::Alert => (Mode::Normal, "breach cleared".to_string(), observed_peaks(summary)),
            Mode::Degraded if breach => {
                self.clear_streak = 0;
                return None;
            }
            Mode::Degraded => {
                self.clear_streak += 1;
                if self.recovery_after_clear == 0 || self.clear_streak < self.recovery_after_clear {
                    return None;
                }
                (
                    Mode::Recovery,
                    format!(
                        "internal recovery trigger after {} clear evaluations",
                        self.clear_streak
                    ),
                    observed_peaks(summary),
                )
            }
            Mode::Recovery if breach => {
                self.clear_streak = 0;
                return None;
            }
            Mode::Recovery => {
                self.clear_streak += 1;
                if self.clear_streak < self.recovery_checks {
                    return None;
                }
                (Mode::Normal, "self-checks passed".to_string(), observed_peaks(summary))
            }
            // 只有 trigger_recovery 能离开 LOCKDOWN
            Mode::Lockdown => return None,
        };

        self.apply(to, reason, triggers).ok()
    }

    /// 带外的严重/安全信号：任意状态进入 LOCKDOWN；已处于 LOCKDOWN 时返回 None
    pub fn signal_critical(
        &mut self,
        reason: impl Into<String>,
        triggers: Vec<TriggerMetric>,
    ) -> Option<ModeTransition> {
        if self.get_mode() == Mode::Lockdown {
            return None;
        }
        self.apply(Mode::Lockdown, reason.into(), triggers).ok()
    }

    /// 显式恢复触发（内部或运维发起）：DEGRADED / LOCKDOWN → RECOVERY
    pub fn trigger_recovery(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<ModeTransition, ModeError> {
        self.apply(Mode::Recovery, reason.into(), Vec::new())
    }

    fn apply(
        &mut self,
        to: Mode,
        reason: String,
        triggers: Vec<TriggerMetric>,
    ) -> Result<ModeTransition, ModeError> {
        let from = self.get_mode();
        if !from.can_transition_to(to) {
            return Err(ModeError::IllegalTransition { from, to });
        }
        let at = Utc::now();
        let transition = ModeTransition {
            from,
            to,
            reason: reason.clone(),
            triggers: triggers.clone(),
            at,
        };

        self.tx.send_replace(ModeState {
            mode: to,
            reason: Some(reason),
            triggers,
            since: at,
        });
        // ALERT 的越线计数从触发它的那次评估开始累计
        if to != Mode::Alert {
            self.breach_streak = 0;
        }
        self.clear_streak = 0;

        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());

        let triggers_json = serde_json::to_string(&transition.triggers).unwrap_or_default();
        if matches!(to, Mode::Alert | Mode::Degraded | Mode::Lockdown) {
            tracing::warn!(
                from = %from,
                to = %to,
                reason = %transition.reason,
                triggers = %triggers_json,
                "mode transition"
            );
        } else {
            tracing::info!(
                from = %from,
                to = %to,
                reason = %transition.reason,
                triggers = %triggers_json,
                "mode transition"
            );
        }
        Ok(transition)
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new(&ModeSection::default())
    }
}

/// 每个越线指标取最大观测值
fn breach_triggers(summary: &MetricsSummary) -> Vec<TriggerMetric> {
    let mut out: Vec<TriggerMetric> = Vec::new();
    for v in &summary.violations {
        match out.iter_mut().find(|t| t.metric == v.metric) {
            Some(t) if v.value > t.value => t.value = v.value,
            Some(_) => {}
            None => out.push(TriggerMetric {
                metric: v.metric.clone(),
                value: v.value,
            }),
        }
    }
    out
}

fn observed_peaks(summary: &MetricsSummary) -> Vec<TriggerMetric> {
    summary
        .aggregates()
        .filter_map(|(name, agg)| {
            agg.max.map(|value| TriggerMetric {
                metric: name.to_string(),
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MetricAggregate, ThresholdViolation};
    use crate::sensors::CPU_PERCENT;

    fn breach() -> MetricsSummary {
        let mut s = MetricsSummary::empty(5.0);
        s.sample_count = 1;
        s.cpu = MetricAggregate::single(97.0);
        s.violations.push(ThresholdViolation {
            metric: CPU_PERCENT.to_string(),
            value: 97.0,
            threshold: 85.0,
            mode: Mode::Normal,
            at: Utc::now(),
        });
        s
    }

    fn clear() -> MetricsSummary {
        let mut s = MetricsSummary::empty(5.0);
        s.sample_count = 1;
        s.cpu = MetricAggregate::single(20.0);
        s
    }

    #[test]
    fn test_three_breaches_degrade() {
        let mut c = ModeController::default();
        assert_eq!(c.evaluate_transition(&breach()).map(|t| t.to), Some(Mode::Alert));
        assert!(c.evaluate_transition(&breach()).is_none());
        let t = c.evaluate_transition(&breach()).unwrap();
        assert_eq!((t.from, t.to), (Mode::Alert, Mode::Degraded));
        assert_eq!(t.triggers[0].metric, CPU_PERCENT);
        assert_eq!(t.triggers[0].value, 97.0);
    }

    #[test]
    fn test_breach_then_clear_returns_normal() {
        let mut c = ModeController::default();
        c.evaluate_transition(&breach());
        let t = c.evaluate_transition(&clear()).unwrap();
        assert_eq!((t.from, t.to), (Mode::Alert, Mode::Normal));
        assert_eq!(c.get_mode(), Mode::Normal);
        // 计数已重置：再来一次越线只到 ALERT
        c.evaluate_transition(&breach());
        c.evaluate_transition(&breach());
        assert_eq!(c.get_mode(), Mode::Alert);
    }

    #[test]
    fn test_degraded_internal_recovery_then_normal() {
        let mut c = ModeController::default();
        for _ in 0..3 {
            c.evaluate_transition(&breach());
        }
        assert_eq!(c.get_mode(), Mode::Degraded);
        assert!(c.evaluate_transition(&clear()).is_none());
        assert_eq!(c.evaluate_transition(&clear()).map(|t| t.to), Some(Mode::Recovery));
        // RECOVERY 中越线不会回退到 DEGRADED
        assert!(c.evaluate_transition(&breach()).is_none());
        assert_eq!(c.get_mode(), Mode::Recovery);
        assert_eq!(c.evaluate_transition(&clear()).map(|t| t.to), Some(Mode::Normal));
    }

    #[test]
    fn test_manual_recovery_only_when_disabled_internal() {
        let cfg = ModeSection {
            recovery_after_clear: 0,
            ..ModeSection::default()
        };
        let mut c = ModeController::new(&cfg);
        for _ in 0..3 {
            c.evaluate_transition(&breach());
        }
        for _ in 0..5 {
            assert!(c.evaluate_transition(&clear()).is_none());
        }
        assert_eq!(c.trigger_recovery("operator").unwrap().to, Mode::Recovery);
    }

    #[test]
    fn test_lockdown_exits_only_via_recovery() {
        let mut c = ModeController::default();
        let t = c.signal_critical("intrusion detected", vec![]).unwrap();
        assert_eq!((t.from, t.to), (Mode::Normal, Mode::Lockdown));
        assert!(c.signal_critical("again", vec![]).is_none());
        for _ in 0..5 {
            assert!(c.evaluate_transition(&clear()).is_none());
        }
        assert_eq!(c.get_mode(), Mode::Lockdown);
        assert_eq!(c.trigger_recovery("operator").unwrap().to, Mode::Recovery);
        assert_eq!(c.evaluate_transition(&clear()).map(|t| t.to), Some(Mode::Normal));
    }

    #[test]
    fn test_trigger_recovery_illegal_from_normal() {
        let mut c = ModeController::default();
        assert_eq!(
            c.trigger_recovery("nope"),
            Err(ModeError::IllegalTransition {
                from: Mode::Normal,
                to: Mode::Recovery
            })
        );
    }

    #[test]
    fn test_handle_sees_snapshot_and_history_recorded() {
        let mut c = ModeController::default();
        let handle = c.handle();
        c.evaluate_transition(&breach());
        assert_eq!(handle.mode(), Mode::Alert);
        assert_eq!(handle.snapshot().reason.as_deref(), Some("threshold breach"));
        assert_eq!(c.history().count(), 1);
    }

    #[tokio::test]
    async fn test_handle_changed_notifies() {
        let mut c = ModeController::default();
        let mut handle = c.handle();
        c.signal_critical("tamper", vec![]);
        let state = handle.changed().await.unwrap();
        assert_eq!(state.mode, Mode::Lockdown);
    }
}
