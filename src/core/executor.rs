//! 任务执行器：驱动一次请求走完 ROUTING → 执行分支 → REFLECTION → COMPLETED
//!
//! 进入 ROUTING 时启动请求级 ResourceMonitor；无论以 COMPLETED、FAILED 还是 panic 结束，
//! 返回前都恰好停止监控一次并写入 metrics_summary，然后交给 ModeController 评估迁移，
//! 最后在后台任务中生成反思记录（调用方不等待，drain_reflections 可统一回收）。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::recovery::CallKind;
use crate::core::{
    ExecutionContext, ExternalError, FailureKind, RecoveryAction, RecoveryEngine, TaskFailure,
    TaskState,
};
use crate::llm::{LlmClient, Message};
use crate::mode::{Governance, ModeController, ModeHandle, ModeThresholds, Operation};
use crate::monitor::{MetricsSummary, MonitorOptions, ResourceMonitor};
use crate::persistence::ReflectionSink;
use crate::reflection::{ReflectionGenerator, ReflectionInput};
use crate::routing::{Route, Router};
use crate::sensors::SensorCache;
use crate::tools::ToolExecutor;

/// 任务执行器（进程内共享一个实例）
pub struct TaskExecutor {
    pub(crate) router: Arc<dyn Router>,
    pub(crate) delegate: Arc<dyn LlmClient>,
    pub(crate) tools: ToolExecutor,
    pub(crate) cache: Arc<SensorCache>,
    pub(crate) mode: Arc<Mutex<ModeController>>,
    pub(crate) mode_handle: ModeHandle,
    pub(crate) thresholds: ModeThresholds,
    pub(crate) governance: Arc<dyn Governance>,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) monitor_options: MonitorOptions,
    pub(crate) reflection: Arc<ReflectionGenerator>,
    pub(crate) sink: Arc<dyn ReflectionSink>,
    pub(crate) pending: StdMutex<Vec<JoinHandle<()>>>,
}

impl TaskExecutor {
    /// 执行一次请求；总是返回带 metrics_summary 的上下文
    pub async fn execute(&self, request: &str) -> ExecutionContext {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let mut ctx = ExecutionContext::new(trace_id.clone());
        tracing::debug!(trace_id = %trace_id, "task routing");

        let mut monitor = ResourceMonitor::new(
            trace_id.clone(),
            self.cache.clone(),
            self.mode_handle.clone(),
            self.thresholds,
            self.monitor_options,
        );
        if let Err(e) = monitor.start() {
            tracing::warn!(trace_id = %trace_id, error = %e, "monitor start failed");
        }

        let outcome = AssertUnwindSafe(self.run(request, &mut ctx))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(reply)) => {
                ctx.reply = Some(reply);
                ctx.advance(TaskState::Reflection, None);
                ctx.advance(TaskState::Completed, None);
            }
            Ok(Err(failure)) => ctx.fail(failure),
            Err(panic) => ctx.fail(TaskFailure::new(
                FailureKind::Internal,
                format!("task panicked: {}", panic_message(panic.as_ref())),
            )),
        }

        let summary = monitor.stop().await;
        ctx.metrics_summary = Some(summary.clone());

        if let Some(t) = self.mode.lock().await.evaluate_transition(&summary) {
            tracing::debug!(
                trace_id = %trace_id,
                from = %t.from,
                to = %t.to,
                "mode changed after task"
            );
        }

        match &ctx.error {
            None => tracing::info!(
                trace_id = %trace_id,
                duration_seconds = summary.duration_seconds,
                samples = summary.sample_count,
                "task completed"
            ),
            Some(err) => tracing::warn!(
                trace_id = %trace_id,
                kind = %err.kind,
                error = %err.message,
                "task failed"
            ),
        }

        self.dispatch_reflection(request, &ctx, summary);
        ctx
    }

    /// 路由并执行分支，成功时返回回复
    async fn run(&self, request: &str, ctx: &mut ExecutionContext) -> Result<String, TaskFailure> {
        let trace_id = ctx.trace_id.clone();
        let route = self
            .call_with_retry(CallKind::Model, &trace_id, || self.router.route(request))
            .await?;

        match route {
            Route::HandleDirect { reply } => {
                ctx.advance(TaskState::HandleDirect, None);
                Ok(reply)
            }
            Route::ToolCall { tool, args } => {
                ctx.advance(TaskState::ToolCall, Some(tool.clone()));
                self.authorize(Operation::ToolCall)?;
                let limit = self.recovery.policy(CallKind::Tool).timeout;
                self.call_with_retry(CallKind::Tool, &trace_id, || {
                    self.tools.execute(&tool, args.clone(), limit)
                })
                .await
            }
            Route::ModelDelegate { prompt } => {
                ctx.advance(TaskState::ModelDelegate, None);
                self.authorize(Operation::ModelDelegate)?;
                let messages = vec![Message::user(prompt)];
                self.call_with_retry(CallKind::Model, &trace_id, || {
                    self.delegate.complete(&messages)
                })
                .await
            }
        }
    }

    fn authorize(&self, operation: Operation) -> Result<(), TaskFailure> {
        let mode = self.mode_handle.mode();
        if self.governance.permits(mode, operation) {
            Ok(())
        } else {
            Err(TaskFailure::new(
                FailureKind::PermissionDenied,
                format!("{operation:?} is not permitted in {mode} mode"),
            ))
        }
    }

    /// 带超时调用并按 RecoveryEngine 的决定退避重试
    async fn call_with_retry<T, F, Fut>(
        &self,
        kind: CallKind,
        trace_id: &str,
        mut call: F,
    ) -> Result<T, TaskFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let limit = self.recovery.policy(kind).timeout;
        let mut attempt = 0u32;
        loop {
            let err = match tokio::time::timeout(limit, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ExternalError::Timeout(format!(
                    "{} call exceeded {limit:?}",
                    kind.as_str()
                )),
            };
            match self.recovery.handle(kind, &err, attempt) {
                RecoveryAction::RetryAfter(delay) => {
                    tracing::warn!(
                        trace_id = %trace_id,
                        call = kind.as_str(),
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "external call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RecoveryAction::Fail(failure) => return Err(failure),
            }
        }
    }

    fn dispatch_reflection(&self, request: &str, ctx: &ExecutionContext, summary: MetricsSummary) {
        let route = ctx
            .steps
            .iter()
            .map(|s| s.state)
            .find(|s| {
                matches!(
                    s,
                    TaskState::HandleDirect | TaskState::ToolCall | TaskState::ModelDelegate
                )
            });
        let input = ReflectionInput {
            trace_id: ctx.trace_id.clone(),
            request: request.to_string(),
            final_state: ctx.final_state(),
            route,
            reply: ctx.reply.clone(),
            error: ctx.error.clone(),
            mode: self.mode_handle.mode(),
            summary,
        };
        let generator = self.reflection.clone();
        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            let entry = generator.generate(&input).await;
            tracing::debug!(trace_id = %entry.trace_id, tier = ?entry.tier, "reflection generated");
            if let Err(e) = sink.write(&entry).await {
                tracing::warn!(trace_id = %entry.trace_id, error = %e, "reflection write failed");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// 等待所有尚未完成的反思任务
    pub async fn drain_reflections(&self) {
        let handles: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *pending)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "reflection task ended abnormally");
            }
        }
    }

    pub fn mode_controller(&self) -> Arc<Mutex<ModeController>> {
        self.mode.clone()
    }

    pub fn mode(&self) -> ModeHandle {
        self.mode_handle.clone()
    }

    pub fn cache(&self) -> &Arc<SensorCache> {
        &self.cache
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.tool_names()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
