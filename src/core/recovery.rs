//! 错误恢复建议
//!
//! 工具执行失败在 Act 边界被转换为失败结果；RecoveryEngine 根据错误文本给出可读的恢复建议，
//! 由展示层在错误信息后列出。

use crate::core::AgentError;

/// 将工具错误映射为恢复建议（关键词匹配，无状态）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型给出建议
    pub fn handle(&self, tool_name: &str, err: &AgentError) -> Vec<String> {
        match err {
            AgentError::ToolTimeout(_) => vec![
                format!("{tool_name} did not finish in time; retry or raise tools.tool_timeout_secs"),
                "Break the request into smaller steps".to_string(),
            ],
            AgentError::PathEscape(path) => vec![format!(
                "'{path}' is outside the workspace; use a path relative to the project root"
            )],
            AgentError::UnknownTool(_) => {
                vec!["Ask for one of the available tools, e.g. \"list files\"".to_string()]
            }
            other => self.suggest(tool_name, &other.to_string()),
        }
    }

    /// 根据错误文本给出建议
    pub fn suggest(&self, tool_name: &str, error: &str) -> Vec<String> {
        let lower = error.to_lowercase();
        let mut out = Vec::new();
        if lower.contains("not found") || lower.contains("no such file") {
            out.push("Check the path; \"list files\" shows what exists here".to_string());
        }
        if lower.contains("permission") {
            out.push("Check file permissions or run from a directory you own".to_string());
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            out.push(format!("Retry {tool_name}, or raise tools.tool_timeout_secs"));
        }
        if lower.contains("not a git repository") {
            out.push("Initialize a repository with `git init` first".to_string());
        }
        if lower.contains("forbidden") {
            out.push("The command matches a forbidden pattern; run it manually if intended".to_string());
        }
        if lower.contains("nothing to commit") {
            out.push("Stage or modify files before committing".to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_tool_timeout() {
        let engine = RecoveryEngine::new();
        let s = engine.handle("run_command", &AgentError::ToolTimeout("run_command".into()));
        assert_eq!(s.len(), 2);
        assert!(s[0].contains("run_command"));
    }

    #[test]
    fn test_recovery_not_found() {
        let engine = RecoveryEngine::new();
        let s = engine.handle(
            "read_file",
            &AgentError::ToolExecutionFailed("File not found: a.txt".into()),
        );
        assert!(s.iter().any(|x| x.contains("list files")));
    }

    #[test]
    fn test_recovery_unmatched_is_empty() {
        assert!(RecoveryEngine::new().suggest("x", "weird failure").is_empty());
    }
}
