//! 执行错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ExternalError 决定 RetryAfter（瞬时故障）或 Fail（永久故障 / 重试耗尽）。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 外部协作方（工具、委托模型、路由模型）调用失败的分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ExternalError {
    /// 超时与连接失败属于瞬时故障，可在重试预算内退避重试
    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Timeout(_) | ExternalError::Connection(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExternalError::Timeout(_) => FailureKind::Timeout,
            ExternalError::Connection(_) => FailureKind::Unavailable,
            ExternalError::PermissionDenied(_) => FailureKind::PermissionDenied,
            ExternalError::MalformedResponse(_) => FailureKind::MalformedResponse,
        }
    }
}

/// 任务失败的分类（对用户可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unavailable,
    PermissionDenied,
    MalformedResponse,
    /// 执行过程中出现未捕获的 panic
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Unavailable => "unavailable",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::MalformedResponse => "malformed response",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// 任务终止于 FAILED 时携带的可读错误
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ExternalError> for TaskFailure {
    fn from(err: ExternalError) -> Self {
        TaskFailure::new(err.failure_kind(), err.to_string())
    }
}

/// 恢复引擎根据错误类型与已尝试次数给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待退避时长后重试
    RetryAfter(Duration),
    /// 放弃，任务进入 FAILED
    Fail(TaskFailure),
}
