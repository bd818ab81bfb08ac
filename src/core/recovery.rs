//! 错误恢复引擎
//!
//! 根据 ExternalError 类型与已尝试次数返回 RecoveryAction：瞬时故障在预算内指数退避重试，
//! 永久故障或预算耗尽则给出分类后的 TaskFailure。

use std::time::Duration;

use crate::config::ExecutorSection;
use crate::core::{ExternalError, RecoveryAction, TaskFailure};

/// 外部调用类型（各自有独立的超时与重试上限）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Tool,
    Model,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Tool => "tool",
            CallKind::Model => "model",
        }
    }
}

/// 单类外部调用的超时与重试上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
}

/// 指数退避恢复引擎
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    backoff_base: Duration,
    backoff_max: Duration,
    tool: RetryPolicy,
    model: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(
        backoff_base: Duration,
        backoff_max: Duration,
        tool: RetryPolicy,
        model: RetryPolicy,
    ) -> Self {
        Self {
            backoff_base,
            backoff_max: backoff_max.max(backoff_base),
            tool,
            model,
        }
    }

    pub fn from_config(cfg: &ExecutorSection) -> Self {
        Self::new(
            Duration::from_millis(cfg.backoff_base_ms),
            Duration::from_millis(cfg.backoff_max_ms),
            RetryPolicy {
                timeout: Duration::from_secs(cfg.tool_timeout_secs.max(1)),
                max_retries: cfg.max_retries.tool,
            },
            RetryPolicy {
                timeout: Duration::from_secs(cfg.model_timeout_secs.max(1)),
                max_retries: cfg.max_retries.model,
            },
        )
    }

    pub fn policy(&self, kind: CallKind) -> RetryPolicy {
        match kind {
            CallKind::Tool => self.tool,
            CallKind::Model => self.model,
        }
    }

    /// 第 attempt 次（从 0 起）失败后的退避时长：base * 2^attempt，封顶 backoff_max
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    /// 根据错误与已失败次数（attempt 从 0 起）决定重试还是放弃
    pub fn handle(&self, kind: CallKind, err: &ExternalError, attempt: u32) -> RecoveryAction {
        let policy = self.policy(kind);
        if err.is_transient() && attempt < policy.max_retries {
            RecoveryAction::RetryAfter(self.backoff(attempt))
        } else if err.is_transient() {
            RecoveryAction::Fail(TaskFailure::new(
                err.failure_kind(),
                format!(
                    "{} call failed after {} attempts: {}",
                    kind.as_str(),
                    attempt + 1,
                    err
                ),
            ))
        } else {
            RecoveryAction::Fail(TaskFailure::from(err.clone()))
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::from_config(&ExecutorSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;

    fn engine() -> RecoveryEngine {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 2,
        };
        RecoveryEngine::new(Duration::from_millis(100), Duration::from_millis(300), policy, policy)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let e = engine();
        assert_eq!(e.backoff(0), Duration::from_millis(100));
        assert_eq!(e.backoff(1), Duration::from_millis(200));
        assert_eq!(e.backoff(2), Duration::from_millis(300));
        assert_eq!(e.backoff(30), Duration::from_millis(300));
    }

    #[test]
    fn test_recovery_transient_retries_within_budget() {
        let e = engine();
        let err = ExternalError::Timeout("search".into());
        assert_eq!(
            e.handle(CallKind::Tool, &err, 0),
            RecoveryAction::RetryAfter(Duration::from_millis(100))
        );
        assert!(matches!(e.handle(CallKind::Tool, &err, 1), RecoveryAction::RetryAfter(_)));
    }

    #[test]
    fn test_recovery_exhausted_budget_classifies() {
        let e = engine();
        let err = ExternalError::Connection("refused".into());
        match e.handle(CallKind::Model, &err, 2) {
            RecoveryAction::Fail(f) => {
                assert_eq!(f.kind, FailureKind::Unavailable);
                assert!(f.message.contains("3 attempts"));
            }
            other => panic!("Expected Fail, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_permanent_fails_immediately() {
        let e = engine();
        let err = ExternalError::PermissionDenied("no access".into());
        match e.handle(CallKind::Tool, &err, 0) {
            RecoveryAction::Fail(f) => assert_eq!(f.kind, FailureKind::PermissionDenied),
            other => panic!("Expected Fail, got {:?}", other),
        }
        let err = ExternalError::MalformedResponse("not json".into());
        assert!(matches!(e.handle(CallKind::Model, &err, 0), RecoveryAction::Fail(_)));
    }
}
