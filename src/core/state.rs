//! 执行状态机：TaskState、步骤历史与 ExecutionContext
//!
//! ROUTING → {HANDLE_DIRECT | TOOL_CALL | MODEL_DELEGATE} → REFLECTION → COMPLETED，
//! 任一非终态均可进入 FAILED。ExecutionContext 由单次执行独占，返回调用方后即交出所有权。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::TaskFailure;
use crate::monitor::MetricsSummary;

/// 任务执行阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Routing,
    HandleDirect,
    ToolCall,
    ModelDelegate,
    Reflection,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// 状态图中是否存在 self → next 的边
    pub fn can_advance_to(&self, next: TaskState) -> bool {
        use TaskState::{
            Completed, Failed, HandleDirect, ModelDelegate, Reflection, Routing, ToolCall,
        };
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Routing, HandleDirect | ToolCall | ModelDelegate) => true,
            (HandleDirect | ToolCall | ModelDelegate, Reflection) => true,
            (Reflection, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Routing => "ROUTING",
            TaskState::HandleDirect => "HANDLE_DIRECT",
            TaskState::ToolCall => "TOOL_CALL",
            TaskState::ModelDelegate => "MODEL_DELEGATE",
            TaskState::Reflection => "REFLECTION",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤历史中的一条：进入的状态、时间与简短说明
#[derive(Clone, Debug, Serialize)]
pub struct StepRecord {
    pub state: TaskState,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// 单次执行的完整上下文（返回给调用方）
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionContext {
    pub trace_id: String,
    #[serde(rename = "final_state")]
    pub state: TaskState,
    pub steps: Vec<StepRecord>,
    /// 监控停止前为 None；execute 返回时总是 Some
    pub metrics_summary: Option<MetricsSummary>,
    pub reply: Option<String>,
    pub error: Option<TaskFailure>,
}

impl ExecutionContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            state: TaskState::Routing,
            steps: vec![StepRecord {
                state: TaskState::Routing,
                at: Utc::now(),
                detail: None,
            }],
            metrics_summary: None,
            reply: None,
            error: None,
        }
    }

    /// 沿状态图前进一步；非法边返回 false 且不改变状态
    pub fn advance(&mut self, next: TaskState, detail: Option<String>) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::error!(
                trace_id = %self.trace_id,
                from = %self.state,
                to = %next,
                "illegal task state transition"
            );
            return false;
        }
        tracing::debug!(trace_id = %self.trace_id, from = %self.state, to = %next, "task state");
        self.state = next;
        self.steps.push(StepRecord {
            state: next,
            at: Utc::now(),
            detail,
        });
        true
    }

    /// 进入 FAILED 并记录分类错误；已处于终态时忽略
    pub fn fail(&mut self, failure: TaskFailure) {
        if self.state.is_terminal() {
            return;
        }
        let detail = failure.to_string();
        self.advance(TaskState::Failed, Some(detail));
        self.error = Some(failure);
    }

    pub fn final_state(&self) -> TaskState {
        self.state
    }
}
