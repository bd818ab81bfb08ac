//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! MockLlmClient 取最后一条 User 消息，回显为 echo 工具调用；
//! ScriptedLlmClient 按脚本逐次返回回复、错误、挂起或 panic，并记录收到的提示词。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ExternalError;
use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：把用户最后一条消息路由到 echo 工具
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ExternalError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(serde_json::json!({
            "tool": "echo",
            "args": { "text": format!("Echo from Mock: {last_user}") }
        })
        .to_string())
    }
}

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(ExternalError),
    /// 挂起指定时长后再回复（用于触发调用方超时）
    Hang(Duration, String),
    Panic(String),
}

/// 按脚本应答的客户端；脚本耗尽后使用 fallback
#[derive(Debug)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: ScriptStep,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: ScriptStep::Fail(ExternalError::Connection("script exhausted".into())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一回复
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new([]).with_fallback(ScriptStep::Reply(reply.into()))
    }

    /// 每次都返回同一错误
    pub fn failing(err: ExternalError) -> Self {
        Self::new([]).with_fallback(ScriptStep::Fail(err))
    }

    pub fn with_fallback(mut self, step: ScriptStep) -> Self {
        self.fallback = step;
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// 每次调用时最后一条消息的内容
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ExternalError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(last);
        let step = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            ScriptStep::Reply(text) => Ok(text),
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            ScriptStep::Panic(msg) => panic!("{msg}"),
        }
    }
}
