//! 规则意图匹配：推理后端不可用或返回无效决策时的确定性兜底
//!
//! 循环与推理后端共用同一个 IntentMatcher，规则在小写输入上按顺序匹配，首个命中生效；
//! 命中的工具未注册时落到默认的 list_directory，它也不在时取字母序第一个已注册工具。
//! 匹配结果总是一个合法的 Action。

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::json;

use crate::tools::Action;

const LIST_PHRASES: &[&str] = &[
    "list files",
    "list the files",
    "list directory",
    "list the directory",
    "what files",
    "files in",
    "show files",
];
const LIST_WORDS: &[&str] = &["ls", "dir"];
const GIT_STATUS_PHRASES: &[&str] = &["git status", "status of git", "git repo"];
const STRUCTURE_PHRASES: &[&str] = &["project structure", "show structure", "directory structure"];
const READ_PHRASES: &[&str] = &["read", "what's in", "what is in", "show me", "display", "cat", "view"];

const DEFAULT_TOOL: &str = "list_directory";

#[derive(Debug, Clone)]
pub struct IntentMatcher {
    tools: BTreeSet<String>,
    /// 引号中的路径；引号前须是行首或空白（避免 what's 里的撇号）
    quoted: Option<Regex>,
}

fn trim_token(tok: &str) -> &str {
    tok.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '?' | '!' | '"' | '\'' | '(' | ')' | '`'))
}

fn has_word(lower: &str, word: &str) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

/// 短语两端须是词边界，"cat" 不命中 "application"
fn has_phrase(lower: &str, phrase: &str) -> bool {
    lower.match_indices(phrase).any(|(i, _)| {
        let before = lower[..i].chars().next_back();
        let after = lower[i + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

impl IntentMatcher {
    pub fn new<I, S>(tool_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tool_names.into_iter().map(Into::into).collect(),
            quoted: Regex::new(r#"(?:^|\s)["'`]([^"'`]+)["'`]"#).ok(),
        }
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(String::as_str)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// 把输入映射为一个动作
    pub fn match_input(&self, input: &str) -> Action {
        let lower = input.trim().to_lowercase();
        let candidate = if LIST_PHRASES.iter().any(|p| lower.contains(p))
            || LIST_WORDS.iter().any(|w| has_word(&lower, w))
        {
            None
        } else if GIT_STATUS_PHRASES.iter().any(|p| lower.contains(p)) {
            Some(Action::new("git_status"))
        } else if STRUCTURE_PHRASES.iter().any(|p| lower.contains(p)) {
            Some(Action::new("get_structure").with_param("max_depth", json!(5)))
        } else if READ_PHRASES.iter().any(|p| has_phrase(&lower, p)) {
            Some(Action::new("read_file").with_param("file_path", json!(self.extract_path(input))))
        } else {
            None
        };

        let action = match candidate {
            Some(a) if self.has_tool(&a.tool_name) => a,
            _ => self.default_action(),
        };
        action.with_reasoning(format!("Rule-based match for: {}", input.trim()))
    }

    fn default_action(&self) -> Action {
        if self.tools.is_empty() || self.has_tool(DEFAULT_TOOL) {
            return Action::new(DEFAULT_TOOL).with_param("path", json!("."));
        }
        self.tools
            .iter()
            .next()
            .map(Action::new)
            .unwrap_or_else(|| Action::new(DEFAULT_TOOL))
    }

    /// 引号中的字符串，否则第一个「点后有字母」的词，否则最后一个词
    pub fn extract_path(&self, input: &str) -> String {
        if let Some(caps) = self.quoted.as_ref().and_then(|re| re.captures(input)) {
            if let Some(m) = caps.get(1) {
                let quoted = m.as_str().trim();
                if !quoted.is_empty() {
                    return quoted.to_string();
                }
            }
        }
        let tokens: Vec<&str> = input.split_whitespace().map(trim_token).filter(|t| !t.is_empty()).collect();
        let dotted = tokens.iter().find(|t| {
            t.rfind('.')
                .map(|i| t[i + 1..].chars().any(char::is_alphabetic))
                .unwrap_or(false)
        });
        if let Some(tok) = dotted {
            return tok.to_string();
        }
        tokens.last().map(|t| t.to_string()).unwrap_or_default()
    }
}
