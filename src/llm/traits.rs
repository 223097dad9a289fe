//! 推理后端 provider 抽象
//!
//! 每个 provider（OpenAI / Groq / Ollama）实现 LlmClient：probe（启动时的最小请求）与 complete（非流式）。
//! 单次失败以 LlmError 返回，由级联决定下一步。

use std::time::Duration;

use async_trait::async_trait;

use crate::core::LlmError;
use crate::llm::Message;

/// 单次调用参数
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// 期望 JSON 对象输出
    pub json_mode: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            json_mode: false,
        }
    }
}

impl CompletionOptions {
    pub fn structured(temperature: f32) -> Self {
        Self {
            temperature,
            max_tokens: Some(500),
            json_mode: true,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// provider 名（openai / groq / ollama）
    fn name(&self) -> &str;

    /// 模型名，用于上下文窗口查表
    fn model(&self) -> &str;

    /// 最小请求，确认 provider 可用
    async fn probe(&self) -> Result<(), LlmError>;

    /// 非流式完成
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String, LlmError>;

    /// 单次 complete 的总时限；超时视为失败，级联继续
    fn attempt_budget(&self) -> Duration {
        Duration::from_secs(30)
    }
}
