//! Ollama 本地模型客户端（reqwest）
//!
//! - probe：GET /api/tags，2 秒超时
//! - complete：POST /api/generate（非流式），按超时阶梯重试；提示过长时先压缩
//!   本地推理对延迟敏感，任何一次调用都不能无限阻塞循环。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::LlmError;
use crate::llm::{last_user_content, CompletionOptions, LlmClient, Message, Role};

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3.2:latest";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const NUM_CTX: u32 = 2048;
const DEFAULT_NUM_PREDICT: u32 = 256;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout_ladder: Vec<Duration>,
    prompt_char_limit: usize,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout_ladder: vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30),
            ],
            prompt_char_limit: 1500,
        }
    }

    /// base_url 取 OLLAMA_BASE_URL，否则 localhost
    pub fn from_env(model: Option<&str>) -> Self {
        let base = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| OLLAMA_DEFAULT_URL.to_string());
        Self::new(&base, model.unwrap_or(OLLAMA_DEFAULT_MODEL))
    }

    pub fn with_timeout_ladder(self, secs: &[u64]) -> Self {
        self.with_timeouts(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// 逐次尝试的超时；空列表保持原阶梯
    pub fn with_timeouts(mut self, ladder: Vec<Duration>) -> Self {
        if !ladder.is_empty() {
            self.timeout_ladder = ladder;
        }
        self
    }

    pub fn with_prompt_char_limit(mut self, limit: usize) -> Self {
        self.prompt_char_limit = limit;
        self
    }

    /// 拼接为单一 prompt；超过字符上限时只保留一行简短指令 + 最后一条用户消息的尾部
    pub fn build_prompt(&self, messages: &[Message], json_mode: bool) -> String {
        let full: String = messages
            .iter()
            .map(|m| match m.role {
                Role::System => format!("System: {}\n\n", m.content),
                Role::User => format!("User: {}\n\n", m.content),
                Role::Assistant => format!("Assistant: {}\n\n", m.content),
            })
            .collect::<String>()
            + "Assistant:";
        if full.chars().count() <= self.prompt_char_limit {
            return full;
        }

        let header = if json_mode {
            "System: Pick one tool. Reply only with JSON {\"tool_name\", \"parameters\", \"reasoning\"}.\n\nUser: "
        } else {
            "System: You are a concise coding assistant.\n\nUser: "
        };
        let footer = "\n\nAssistant:";
        let budget = self
            .prompt_char_limit
            .saturating_sub(header.chars().count() + footer.chars().count());
        let user = last_user_content(messages).unwrap_or("");
        let count = user.chars().count();
        let tail: String = user.chars().skip(count.saturating_sub(budget)).collect();
        tracing::debug!(from = full.len(), to = tail.len(), "shrunk ollama prompt");
        format!("{header}{tail}{footer}")
    }

    async fn generate_once(&self, prompt: &str, options: &CompletionOptions, timeout: Duration) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens.unwrap_or(DEFAULT_NUM_PREDICT),
                "num_ctx": NUM_CTX,
            },
        });
        if options.json_mode {
            body["format"] = json!("json");
        }
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(timeout.as_secs())
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(LlmError::Http(format!("status {}", response.status())));
        }
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse("ollama".into()));
        }
        Ok(parsed.response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!("status {}", response.status())))
        }
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String, LlmError> {
        let prompt = self.build_prompt(messages, options.json_mode);
        let mut last_err = LlmError::Unavailable("no attempts".into());
        for (attempt, timeout) in self.timeout_ladder.iter().enumerate() {
            match self.generate_once(&prompt, options, *timeout).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::debug!(attempt = attempt + 1, timeout_secs = timeout.as_secs(), "ollama attempt failed: {}", e);
                    // 连接失败时重试没有意义
                    let retryable = matches!(e, LlmError::Timeout(_) | LlmError::EmptyResponse(_));
                    last_err = e;
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(last_err)
    }

    fn attempt_budget(&self) -> Duration {
        self.timeout_ladder.iter().sum::<Duration>() + Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_prompt_is_kept() {
        let client = OllamaClient::new("http://127.0.0.1:1", "m");
        let prompt = client.build_prompt(&[Message::system("sys"), Message::user("hi")], false);
        assert_eq!(prompt, "System: sys\n\nUser: hi\n\nAssistant:");
    }

    #[test]
    fn test_long_prompt_is_shrunk_to_user_tail() {
        let client = OllamaClient::new("http://127.0.0.1:1", "m").with_prompt_char_limit(200);
        let long_system = "x".repeat(1000);
        let user = format!("{}what's in package.json", "y".repeat(500));
        let prompt = client.build_prompt(&[Message::system(long_system), Message::user(user)], true);
        assert!(prompt.chars().count() <= 200);
        assert!(prompt.contains("what's in package.json"));
        assert!(prompt.contains("tool_name"));
        assert!(!prompt.contains("xxxx"));
    }

    #[test]
    fn test_attempt_budget_covers_ladder() {
        let client = OllamaClient::new("http://127.0.0.1:1", "m").with_timeout_ladder(&[1, 2]);
        assert_eq!(client.attempt_budget(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_hanging_server_walks_timeout_ladder() {
        use std::sync::{Arc, Mutex};
        use std::time::Instant;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&accepted);
        let server = tokio::spawn(async move {
            // 接受连接但从不回复
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                seen.lock().unwrap().push(Instant::now());
                held.push(socket);
            }
        });

        let ladder = vec![
            Duration::from_millis(200),
            Duration::from_millis(500),
            Duration::from_millis(900),
        ];
        let client = OllamaClient::new(&format!("http://{addr}"), "m").with_timeouts(ladder);
        let started = Instant::now();
        let err = client
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        server.abort();

        assert!(matches!(err, LlmError::Timeout(_)), "unexpected error: {err:?}");
        assert!(elapsed >= Duration::from_millis(1550), "finished too early: {elapsed:?}");

        let times = accepted.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(150) && first_gap < Duration::from_millis(450));
        assert!(second_gap >= Duration::from_millis(450) && second_gap < Duration::from_millis(850));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_fast() {
        let client = OllamaClient::new("http://127.0.0.1:1", "m").with_timeout_ladder(&[1]);
        assert!(client.probe().await.is_err());
        let err = client
            .complete(&[Message::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Http(_) | LlmError::Timeout(_)));
    }
}
