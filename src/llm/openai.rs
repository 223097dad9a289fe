//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenAI 与 Groq 共用此实现。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::core::LlmError;
use crate::llm::{CompletionOptions, LlmClient, Message, Role};

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

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

/// OpenAI 兼容客户端：持有 Client、provider 名与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    name: String,
    model: String,
    probe_timeout: Duration,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(name: &str, base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            name: name.to_string(),
            model: model.to_string(),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            usage: TokenUsage::new(),
        }
    }

    /// 从 OPENAI_API_KEY 构建；无凭据时返回 None（provider 不进入级联）
    pub fn from_env(model: Option<&str>) -> Option<Self> {
        let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
        Some(Self::new("openai", None, model.unwrap_or(OPENAI_DEFAULT_MODEL), &key))
    }

    pub fn with_timeouts(mut self, probe: Duration, request: Duration) -> Self {
        self.probe_timeout = probe;
        self.request_timeout = request;
        self
    }

    /// 获取累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let bad = |e: async_openai::error::OpenAIError| LlmError::InvalidRequest(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(bad)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(bad)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(bad)?,
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> Result<(), LlmError> {
        let options = CompletionOptions {
            temperature: 0.0,
            max_tokens: Some(1),
            json_mode: false,
        };
        let ping = [Message::user("ping")];
        match tokio::time::timeout(self.probe_timeout, self.complete(&ping, &options)).await {
            Ok(Ok(_)) | Ok(Err(LlmError::EmptyResponse(_))) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LlmError::Timeout(self.probe_timeout.as_secs())),
        }
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String, LlmError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(Self::to_openai_messages(messages)?)
            .temperature(options.temperature);
        if let Some(max) = options.max_tokens {
            builder.max_completion_tokens(max);
        }
        let request = builder
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse(self.name.clone()))
    }

    fn attempt_budget(&self) -> Duration {
        self.request_timeout
    }
}
