//! Groq API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.groq.com/openai/v1
//! - 凭据：环境变量 `GROQ_API_KEY`

use crate::llm::OpenAiClient;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// 创建 Groq 客户端；无 `GROQ_API_KEY` 时返回 None
pub fn create_groq_client(base_url: Option<&str>, model: Option<&str>) -> Option<OpenAiClient> {
    let api_key = std::env::var("GROQ_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())?;
    Some(OpenAiClient::new(
        "groq",
        Some(base_url.unwrap_or(GROQ_BASE_URL)),
        model.unwrap_or(GROQ_DEFAULT_MODEL),
        &api_key,
    ))
}
