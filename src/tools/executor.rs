//! 工具执行器
//!
//! 持有 ToolRegistry，execute(tool_name, args, timeout) 在超时内调用 registry.execute，
//! 超时转为 ExternalError::Timeout；每次调用输出结构化审计日志（JSON）。重试由 TaskExecutor 负责。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ExternalError;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时并记录审计
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        limit: Duration,
    ) -> Result<String, ExternalError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(limit, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(ExternalError::Timeout(format!(
                "tool '{tool_name}' exceeded {limit:?}"
            ))),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<String, ExternalError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        ToolExecutor::new(registry)
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let out = executor()
            .execute("echo", serde_json::json!({"text": "hi"}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out() {
        let err = executor()
            .execute("slow", serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_malformed() {
        let err = executor()
            .execute("rm", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::MalformedResponse(_)));
    }
}
