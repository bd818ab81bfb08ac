//! 路由：决定一次请求走 HANDLE_DIRECT / TOOL_CALL / MODEL_DELEGATE
//!
//! PlannerRouter 调用 LLM；parse_route 只把 ```json 代码块或以 `{` 开头的输出当作路由 JSON，
//! 其余文本（即便含有花括号，如代码片段）一律视为直接回复。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ExternalError;
use crate::llm::{LlmClient, Message};

/// 路由结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Route {
    /// 直接回复用户
    HandleDirect { reply: String },
    /// 需要执行工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 交给委托模型
    ModelDelegate { prompt: String },
}

/// 路由协作方
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, request: &str) -> Result<Route, ExternalError>;
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<serde_json::Value>,
    #[serde(default)]
    delegate: Option<String>,
}

/// 解析路由模型输出：tool 非空为 ToolCall，delegate 非空为 ModelDelegate，普通文本为直接回复
pub fn parse_route(output: &str) -> Result<Route, ExternalError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(ExternalError::MalformedResponse("empty routing output".into()));
    }

    let json_str = match route_json(trimmed) {
        Some(s) => s,
        None => {
            return Ok(Route::HandleDirect {
                reply: trimmed.to_string(),
            })
        }
    };

    let raw: RawRoute = serde_json::from_str(json_str)
        .map_err(|e| ExternalError::MalformedResponse(format!("{}: {}", e, json_str)))?;

    match (raw.tool.filter(|t| !t.trim().is_empty()), raw.delegate) {
        (Some(tool), _) => Ok(Route::ToolCall {
            tool,
            args: raw.args.unwrap_or_else(|| serde_json::json!({})),
        }),
        (None, Some(prompt)) if !prompt.trim().is_empty() => Ok(Route::ModelDelegate { prompt }),
        _ => Err(ExternalError::MalformedResponse(format!(
            "routing JSON names neither a tool nor a delegate: {json_str}"
        ))),
    }
}

/// 路由 JSON 只认 ```json 代码块或整段以 `{` 开头的输出
fn route_json(trimmed: &str) -> Option<&str> {
    if trimmed.contains("```json") || trimmed.starts_with('{') {
        extract_json(trimmed)
    } else {
        None
    }
}

/// 提取 JSON 块（```json ... ``` 或首个 { 到末个 }）
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find('{')?;
    match text.rfind('}') {
        Some(end) if end > start => Some(&text[start..=end]),
        // 未闭合：交给 serde 报错
        _ => Some(&text[start..]),
    }
}

const DEFAULT_ROUTING_PROMPT: &str = "You are the router of a personal task executor. \
For the user's request choose exactly one action:\n\
1. Answer directly: reply with plain text only, no JSON.\n\
2. Call a tool: reply with only {\"tool\": \"<name>\", \"args\": {...}}.\n\
3. Delegate to a stronger model: reply with only {\"delegate\": \"<self-contained prompt>\"}.\n\
Available tools:\n";

/// LLM 路由器：持有 LLM、system prompt 与工具 schema
pub struct PlannerRouter {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl PlannerRouter {
    pub fn new(llm: Arc<dyn LlmClient>, tools_schema: &str) -> Self {
        Self {
            llm,
            system_prompt: format!("{DEFAULT_ROUTING_PROMPT}{tools_schema}"),
        }
    }
}

#[async_trait]
impl Router for PlannerRouter {
    async fn route(&self, request: &str) -> Result<Route, ExternalError> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(request.to_string()),
        ];
        let output = self.llm.complete(&messages).await?;
        parse_route(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_parse_plain_text_is_direct() {
        assert_eq!(
            parse_route("  Paris is the capital of France. ").unwrap(),
            Route::HandleDirect {
                reply: "Paris is the capital of France.".into()
            }
        );
    }

    #[test]
    fn test_parse_prose_with_braces_is_direct() {
        let reply = "In Rust an empty struct is written `struct Unit {}`.";
        assert_eq!(
            parse_route(reply).unwrap(),
            Route::HandleDirect {
                reply: reply.into()
            }
        );

        let reply = "Write `fn main() { println!(\"hi\"); }` in main.rs.";
        assert_eq!(
            parse_route(reply).unwrap(),
            Route::HandleDirect {
                reply: reply.into()
            }
        );

        let reply = "Use this config:\n```toml\n[monitor]\nenabled = { value = true }\n```";
        assert!(matches!(parse_route(reply).unwrap(), Route::HandleDirect { .. }));
    }

    #[test]
    fn test_parse_tool_call_in_code_fence() {
        let out = "Sure:\n```json\n{\"tool\": \"echo\", \"args\": {\"text\": \"hi\"}}\n```";
        match parse_route(out).unwrap() {
            Route::ToolCall { tool, args } => {
                assert_eq!(tool, "echo");
                assert_eq!(args["text"], "hi");
            }
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_delegate() {
        assert_eq!(
            parse_route(r#"{"delegate": "Prove the lemma"}"#).unwrap(),
            Route::ModelDelegate {
                prompt: "Prove the lemma".into()
            }
        );
    }

    #[test]
    fn test_parse_tool_without_args_defaults() {
        match parse_route(r#"{"tool": "system_metrics"}"#).unwrap() {
            Route::ToolCall { args, .. } => assert!(args.as_object().unwrap().is_empty()),
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_route(r#"{"tool": "echo", "args": "#),
            Err(ExternalError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_route(r#"{"foo": 1}"#),
            Err(ExternalError::MalformedResponse(_))
        ));
        assert!(parse_route("   ").is_err());
    }

    #[tokio::test]
    async fn test_planner_router_with_mock() {
        let router = PlannerRouter::new(Arc::new(MockLlmClient), "[]");
        match router.route("ping").await.unwrap() {
            Route::ToolCall { tool, .. } => assert_eq!(tool, "echo"),
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }
}
