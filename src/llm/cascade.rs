//! 推理后端：provider 级联 + 规则兜底
//!
//! providers 按优先级排列（默认 openai → groq → ollama）。启动时 initialize 逐个 probe，选中第一个可用者；
//! 每次调用先试上次成功的 provider，再按优先级遍历其余 provider，全部失败后落到 IntentMatcher。
//! 单次尝试受 attempt_budget 限时，超时按失败处理。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::core::LlmError;
use crate::intent::IntentMatcher;
use crate::llm::token_budget::{context_window, fit_messages};
use crate::llm::{last_user_content, CompletionOptions, LlmClient, Message};
use crate::tools::Action;

const NO_PROVIDER: usize = usize::MAX;
pub const USER_INPUT_PREFIX: &str = "User input:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub active: Option<String>,
    pub available: Vec<String>,
}

/// 决策来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSource {
    Provider(String),
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub source: DecisionSource,
}

pub struct ReasoningBackend {
    providers: Vec<Arc<dyn LlmClient>>,
    active: AtomicUsize,
    matcher: IntentMatcher,
    reserved_tokens: usize,
    temperature: f32,
}

impl ReasoningBackend {
    pub fn new(providers: Vec<Arc<dyn LlmClient>>, matcher: IntentMatcher) -> Self {
        Self {
            providers,
            active: AtomicUsize::new(NO_PROVIDER),
            matcher,
            reserved_tokens: 500,
            temperature: 0.3,
        }
    }

    /// 无 provider：只用规则兜底
    pub fn fallback_only(matcher: IntentMatcher) -> Self {
        Self::new(Vec::new(), matcher)
    }

    pub fn with_reserved_tokens(mut self, reserved: usize) -> Self {
        self.reserved_tokens = reserved;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn matcher(&self) -> &IntentMatcher {
        &self.matcher
    }

    /// 启动时逐个 probe，返回选中的 provider 名
    pub async fn initialize(&self) -> Option<String> {
        for (idx, provider) in self.providers.iter().enumerate() {
            match provider.probe().await {
                Ok(()) => {
                    self.active.store(idx, Ordering::SeqCst);
                    tracing::info!(provider = provider.name(), model = provider.model(), "reasoning provider selected");
                    return Some(provider.name().to_string());
                }
                Err(e) => tracing::warn!(provider = provider.name(), "probe failed: {}", e),
            }
        }
        tracing::warn!("no reasoning provider available, using rule-based fallback");
        None
    }

    pub fn provider_info(&self) -> ProviderInfo {
        let active = self.active.load(Ordering::SeqCst);
        ProviderInfo {
            active: self.providers.get(active).map(|p| p.name().to_string()),
            available: self.providers.iter().map(|p| p.name().to_string()).collect(),
        }
    }

    /// 上次成功的 provider 在前，其余按优先级
    fn attempt_order(&self) -> Vec<usize> {
        let active = self.active.load(Ordering::SeqCst);
        let mut order = Vec::with_capacity(self.providers.len());
        if active < self.providers.len() {
            order.push(active);
        }
        order.extend((0..self.providers.len()).filter(|i| *i != active));
        order
    }

    async fn attempt(
        &self,
        provider: &Arc<dyn LlmClient>,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let fitted = fit_messages(messages, context_window(provider.model()), self.reserved_tokens);
        let budget = provider.attempt_budget();
        match tokio::time::timeout(budget, provider.complete(&fitted, options)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(budget.as_secs())),
        }
    }

    /// 级联调用；返回 (文本, provider 名)，全部失败返回 None
    async fn cascade(&self, messages: &[Message], options: &CompletionOptions) -> Option<(String, String)> {
        for idx in self.attempt_order() {
            let provider = &self.providers[idx];
            match self.attempt(provider, messages, options).await {
                Ok(text) => {
                    self.active.store(idx, Ordering::SeqCst);
                    return Some((text, provider.name().to_string()));
                }
                Err(e) => tracing::warn!(provider = provider.name(), "reasoning attempt failed: {}", e),
            }
        }
        None
    }

    /// 自由文本生成；全部失败时返回规则兜底决策的 JSON
    pub async fn generate(&self, messages: &[Message], temperature: f32) -> String {
        let options = CompletionOptions {
            temperature,
            ..Default::default()
        };
        match self.cascade(messages, &options).await {
            Some((text, _)) => text,
            None => action_json(&self.fallback(messages)).to_string(),
        }
    }

    /// 结构化决策 {tool_name, parameters, reasoning}；回复无法解析或工具未注册时用规则兜底
    pub async fn generate_structured(&self, messages: &[Message]) -> Decision {
        let options = CompletionOptions::structured(self.temperature);
        if let Some((text, provider)) = self.cascade(messages, &options).await {
            match parse_decision(&text) {
                Some(action) if self.matcher.has_tool(&action.tool_name) => {
                    tracing::debug!(provider = %provider, tool = %action.tool_name, "structured decision");
                    return Decision {
                        action,
                        source: DecisionSource::Provider(provider),
                    };
                }
                Some(action) => {
                    tracing::warn!(provider = %provider, tool = %action.tool_name, "decision names an unknown tool")
                }
                None => tracing::warn!(provider = %provider, "unparsable decision"),
            }
        }
        Decision {
            action: self.fallback(messages),
            source: DecisionSource::Fallback,
        }
    }

    fn fallback(&self, messages: &[Message]) -> Action {
        self.matcher.match_input(&extract_user_input(messages))
    }
}

fn action_json(action: &Action) -> Value {
    json!({
        "tool_name": action.tool_name,
        "parameters": action.parameters,
        "reasoning": action.reasoning,
    })
}

/// 从最后一条 user 消息中取「User input:」行，没有则取整条消息
pub fn extract_user_input(messages: &[Message]) -> String {
    let content = last_user_content(messages).unwrap_or("");
    content
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(USER_INPUT_PREFIX))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| content.trim().to_string())
}

/// 回复中第一个完整的 {...}（跳过字符串内的括号）
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 解析决策；缺少 tool_name 视为无效
pub fn parse_decision(text: &str) -> Option<Action> {
    let value: Value = serde_json::from_str(first_json_object(text)?).ok()?;
    let tool_name = value.get("tool_name")?.as_str()?.trim();
    if tool_name.is_empty() {
        return None;
    }
    let parameters = value
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);
    let reasoning = value.get("reasoning").and_then(Value::as_str).unwrap_or("");
    Some(Action {
        tool_name: tool_name.to_string(),
        parameters,
        reasoning: reasoning.to_string(),
    })
}
