//! 推理后端层：消息、provider 抽象与实现（OpenAI / Groq / Ollama）、token 预算、级联

pub mod cascade;
pub mod groq;
pub mod message;
pub mod ollama;
pub mod openai;
pub mod token_budget;
pub mod traits;

use std::sync::Arc;

pub use cascade::{parse_decision, Decision, DecisionSource, ProviderInfo, ReasoningBackend, USER_INPUT_PREFIX};
pub use groq::{create_groq_client, GROQ_BASE_URL, GROQ_DEFAULT_MODEL};
pub use message::{last_user_content, Message, Role};
pub use ollama::{OllamaClient, OLLAMA_DEFAULT_MODEL};
pub use openai::{OpenAiClient, TokenUsage};
pub use token_budget::{context_window, fit_messages, TokenEstimator};
pub use traits::{CompletionOptions, LlmClient};

use crate::config::LlmConfig;

/// 按 provider_order 构建可用的 provider；缺凭据的 provider 直接跳过
pub fn providers_from_config(cfg: &LlmConfig) -> Vec<Arc<dyn LlmClient>> {
    let probe = std::time::Duration::from_secs(cfg.timeouts.probe);
    let request = std::time::Duration::from_secs(cfg.timeouts.request);
    let mut out: Vec<Arc<dyn LlmClient>> = Vec::new();
    for name in &cfg.provider_order {
        match name.as_str() {
            "openai" => match OpenAiClient::from_env(Some(&cfg.openai.model)) {
                Some(c) => out.push(Arc::new(c.with_timeouts(probe, request))),
                None => tracing::info!("OPENAI_API_KEY not set, skipping openai"),
            },
            "groq" => match create_groq_client(cfg.groq.base_url.as_deref(), Some(&cfg.groq.model)) {
                Some(c) => out.push(Arc::new(c.with_timeouts(probe, request))),
                None => tracing::info!("GROQ_API_KEY not set, skipping groq"),
            },
            "ollama" => out.push(Arc::new(
                OllamaClient::new(&cfg.ollama.base_url, &cfg.ollama.model)
                    .with_timeout_ladder(&cfg.ollama.timeout_ladder_secs)
                    .with_prompt_char_limit(cfg.ollama.prompt_char_limit),
            )),
            other => tracing::warn!(provider = other, "unknown provider in llm.provider_order"),
        }
    }
    out
}
