//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 错误按文本特征归类为 ExternalError，供执行器决定是否重试。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::core::ExternalError;
use crate::llm::{LlmClient, Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::default(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, ExternalError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| ExternalError::MalformedResponse(format!("request build: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ExternalError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| ExternalError::MalformedResponse(format!("request build: {e}")))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| classify_api_error(&e))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ExternalError::MalformedResponse("empty completion".into()))
    }
}

/// 按错误类型归类：鉴权、请求与解析错误为永久故障，超时与连接类为瞬时故障
fn classify_api_error(err: &OpenAIError) -> ExternalError {
    let message = err.to_string();
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => ExternalError::Timeout(message),
        OpenAIError::Reqwest(e) if e.is_connect() => ExternalError::Connection(message),
        OpenAIError::Reqwest(e) if e.is_decode() => ExternalError::MalformedResponse(message),
        OpenAIError::Reqwest(e) => match e.status().map(|s| s.as_u16()) {
            Some(401 | 403) => ExternalError::PermissionDenied(message),
            _ => ExternalError::Connection(message),
        },
        OpenAIError::ApiError(api) => classify_api_body(api, message),
        OpenAIError::JSONDeserialize(..) => ExternalError::MalformedResponse(message),
        OpenAIError::StreamError(_) => ExternalError::Connection(message),
        _ => ExternalError::MalformedResponse(message),
    }
}

/// API 返回的错误对象：按 type / code 区分鉴权、请求错误与可重试的服务端错误
fn classify_api_body(api: &ApiError, message: String) -> ExternalError {
    let kind = api.r#type.as_deref().unwrap_or_default();
    let code = api.code.as_deref().unwrap_or_default();
    match (kind, code) {
        ("authentication_error" | "permission_error", _)
        | (_, "invalid_api_key" | "insufficient_quota") => {
            ExternalError::PermissionDenied(message)
        }
        (_, "rate_limit_exceeded") | ("server_error", _) => ExternalError::Connection(message),
        ("invalid_request_error", _) => ExternalError::MalformedResponse(message),
        _ => ExternalError::Connection(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(kind: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "request failed".into(),
            r#type: kind.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn test_classify_api_error() {
        assert!(matches!(
            classify_api_error(&api_error(Some("invalid_request_error"), Some("invalid_api_key"))),
            ExternalError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_api_error(&api_error(Some("authentication_error"), None)),
            ExternalError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_api_error(&api_error(Some("requests"), Some("rate_limit_exceeded"))),
            ExternalError::Connection(_)
        ));
        assert!(matches!(
            classify_api_error(&api_error(Some("invalid_request_error"), Some("model_not_found"))),
            ExternalError::MalformedResponse(_)
        ));
        assert!(matches!(
            classify_api_error(&api_error(None, None)),
            ExternalError::Connection(_)
        ));
    }

    #[test]
    fn test_classify_deserialize_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = OpenAIError::JSONDeserialize(json_err, "{oops".into());
        assert!(matches!(classify_api_error(&err), ExternalError::MalformedResponse(_)));
        let err = OpenAIError::InvalidArgument("model is required".into());
        assert!(matches!(classify_api_error(&err), ExternalError::MalformedResponse(_)));
    }

    #[test]
    fn test_token_usage_accumulates() {
        let client = OpenAiClient::new(None, "gpt-4o-mini", Some("sk-test"));
        assert_eq!(client.token_usage(), (0, 0, 0));
        client.usage.add(120, 30);
        client.usage.add(80, 20);
        assert_eq!(client.token_usage(), (200, 50, 250));
    }
}
