//! Token 预算控制
//!
//! 提交前估算每条消息的 token；超出「模型上下文窗口 - 预留响应」时从最旧的非 system 消息开始丢弃，
//! system 消息始终保留，只有它自身也放不下时才在句子边界截断。

use crate::llm::{Message, Role};

/// 每条消息的格式开销
const MESSAGE_OVERHEAD: usize = 4;
/// 剩余预算低于此值时不再保留被截断的消息
const MIN_PARTIAL_TOKENS: usize = 16;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }
        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    pub fn estimate_message(message: &Message) -> usize {
        Self::estimate(&message.content) + MESSAGE_OVERHEAD
    }

    pub fn estimate_all(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}

/// 模型上下文窗口（按模型族）
pub fn context_window(model: &str) -> usize {
    let m = model.to_lowercase();
    if m.contains("gpt-4-32k") {
        32_768
    } else if m.contains("gpt-3.5-turbo-16k") {
        16_384
    } else if m.contains("gpt-4") {
        8_192
    } else if m.contains("gpt-3.5-turbo") {
        4_096
    } else if m.contains("llama3") || m.contains("llama-3") {
        8_192
    } else {
        4_096
    }
}

/// 将文本截断到 max_tokens 以内，尽量停在句子边界
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let estimated = TokenEstimator::estimate(text);
    if estimated <= max_tokens {
        return text.to_string();
    }
    // 按比例截断，留 10% 余量
    let ratio = max_tokens as f64 / estimated as f64;
    let target_chars = (text.chars().count() as f64 * ratio * 0.9) as usize;
    let cut: String = text.chars().take(target_chars).collect();

    let boundary = cut
        .char_indices()
        .filter(|&(i, c)| {
            matches!(c, '。' | '！' | '？' | '\n')
                || (matches!(c, '.' | '!' | '?')
                    && cut[i + c.len_utf8()..].starts_with(char::is_whitespace))
        })
        .map(|(i, c)| i + c.len_utf8())
        .last();
    let kept = match boundary {
        Some(end) if end >= cut.len() / 2 => &cut[..end],
        _ => cut.as_str(),
    };
    format!("{}\n[truncated]", kept.trim_end())
}

/// 把消息装进 context_window - reserved 的预算
pub fn fit_messages(messages: &[Message], window: usize, reserved: usize) -> Vec<Message> {
    let budget = window.saturating_sub(reserved);
    if TokenEstimator::estimate_all(messages) <= budget {
        return messages.to_vec();
    }

    let system = messages.iter().find(|m| m.role == Role::System);
    let mut remaining = budget;
    let mut head = Vec::new();
    if let Some(sys) = system {
        let cost = TokenEstimator::estimate_message(sys);
        if cost > budget {
            let allowed = budget.saturating_sub(MESSAGE_OVERHEAD);
            tracing::warn!(budget, cost, "system prompt exceeds context budget, truncating");
            return vec![Message::system(truncate_to_tokens(&sys.content, allowed))];
        }
        remaining -= cost;
        head.push(sys.clone());
    }

    // 从最新往回装，最旧的先被丢弃
    let mut kept: Vec<Message> = Vec::new();
    for m in messages.iter().rev().filter(|m| m.role != Role::System) {
        let cost = TokenEstimator::estimate_message(m);
        if cost <= remaining {
            remaining -= cost;
            kept.push(m.clone());
            continue;
        }
        if remaining >= MIN_PARTIAL_TOKENS {
            let allowed = remaining - MESSAGE_OVERHEAD;
            kept.push(Message {
                role: m.role,
                content: truncate_to_tokens(&m.content, allowed),
            });
        }
        break;
    }
    let dropped = messages.len() - head.len() - kept.len();
    tracing::debug!(budget, dropped, "fitted messages to context window");
    kept.reverse();
    head.extend(kept);
    head
}
