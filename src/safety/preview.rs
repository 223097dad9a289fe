//! 破坏性操作预览：变更清单、覆盖已有文件时的 unified diff、版本库脏/暂存摘要、命令风险扫描

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::VcsStatus;
use crate::safety::diff::{change_counts, unified_diff};
use crate::tools::{SafeFs, ToolParams};

const CONTENT_PREVIEW_CHARS: usize = 200;

/// 命令中出现即视为可能丢数据
const CRITICAL_COMMAND_PATTERNS: &[&str] = &["rm ", "del ", "format", "shutdown", "mkfs", "dd "];
const HIGH_COMMAND_PATTERNS: &[&str] = &["git ", "mv ", "cp "];
const READ_ONLY_COMMANDS: &[&str] = &["echo", "ls", "dir", "cat", "pwd"];

/// 风险等级，Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub operation: String,
    pub risk_level: RiskLevel,
    pub changes: Vec<String>,
    pub impact: String,
    pub reversibility: String,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub content_preview: Option<String>,
    pub diff: Option<String>,
    pub staged_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub file_size: Option<u64>,
}

impl Preview {
    fn new(operation: &str, risk_level: RiskLevel) -> Self {
        Self {
            operation: operation.to_string(),
            risk_level,
            changes: Vec::new(),
            impact: String::new(),
            reversibility: String::new(),
            recommendations: Vec::new(),
            summary: String::new(),
            content_preview: None,
            diff: None,
            staged_files: Vec::new(),
            modified_files: Vec::new(),
            file_size: None,
        }
    }

    /// 人类可读的多行描述（审批提示用）
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Operation: {}", self.operation),
            format!("Risk level: {}", self.risk_level),
        ];
        if !self.summary.is_empty() {
            lines.push(format!("Summary: {}", self.summary));
        }
        for c in &self.changes {
            lines.push(format!("  * {c}"));
        }
        if !self.impact.is_empty() {
            lines.push(format!("Impact: {}", self.impact));
        }
        if !self.reversibility.is_empty() {
            lines.push(format!("Reversibility: {}", self.reversibility));
        }
        if let Some(size) = self.file_size {
            lines.push(format!("File size: {size} bytes"));
        }
        if let Some(p) = &self.content_preview {
            lines.push(format!("Content preview:\n{p}"));
        }
        if !self.staged_files.is_empty() {
            lines.push(format!("Staged: {}", self.staged_files.join(", ")));
        }
        if !self.modified_files.is_empty() {
            lines.push(format!("Modified: {}", self.modified_files.join(", ")));
        }
        for r in &self.recommendations {
            lines.push(format!("Recommendation: {r}"));
        }
        lines.join("\n")
    }
}

fn param<'a>(params: &'a ToolParams, key: &str) -> &'a str {
    params.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

/// 对 shell 命令做关键字扫描
pub fn command_risk(command: &str) -> RiskLevel {
    let lower = format!("{} ", command.trim().to_lowercase());
    if CRITICAL_COMMAND_PATTERNS.iter().any(|p| lower.contains(p)) {
        return RiskLevel::Critical;
    }
    if HIGH_COMMAND_PATTERNS.iter().any(|p| lower.contains(p)) {
        return RiskLevel::High;
    }
    let first = lower.split_whitespace().next().unwrap_or("");
    if READ_ONLY_COMMANDS.contains(&first) {
        RiskLevel::Low
    } else {
        RiskLevel::High
    }
}

/// 按操作类型生成预览；base_risk 为静态分级结果
pub fn build_preview(
    fs: &SafeFs,
    operation: &str,
    params: &ToolParams,
    base_risk: RiskLevel,
    vcs: Option<&VcsStatus>,
) -> Preview {
    let mut p = Preview::new(operation, base_risk);
    match operation {
        "write_file" => preview_write(fs, params, &mut p),
        "delete_file" => preview_delete(fs, params, &mut p),
        "run_command" => {
            let command = param(params, "command");
            p.risk_level = command_risk(command);
            p.summary = format!("Run shell command: {command}");
            p.changes.push(format!("Execute `{command}` in the project directory"));
            p.impact = "Arbitrary process execution with your user permissions".into();
            p.reversibility = "Depends on the command; usually not reversible".into();
            if p.risk_level == RiskLevel::Critical {
                p.recommendations
                    .push("This command may destroy data. Double-check the target paths.".into());
            }
        }
        "git_commit" => {
            let message = param(params, "message");
            p.summary = format!("Create commit: {message}");
            if let Some(v) = vcs {
                p.staged_files = v.staged_files.clone();
                p.modified_files = v.modified_files.clone();
                if v.staged_files.is_empty() && param(params, "files").is_empty() {
                    p.recommendations.push("Nothing is staged yet.".into());
                }
            }
            p.changes.push(format!("New commit with message \"{message}\""));
            p.impact = "Adds a commit to the current branch".into();
            p.reversibility = "Reversible with git reset / git revert".into();
        }
        "git_merge" => {
            let branch = param(params, "branch");
            p.summary = format!("Merge branch {branch}");
            p.changes.push(format!("Merge {branch} into the current branch"));
            p.impact = "May rewrite many files and produce conflicts".into();
            p.reversibility = "Reversible with git merge --abort or git reset".into();
            if let Some(v) = vcs {
                p.modified_files = v.modified_files.clone();
                if v.is_dirty {
                    p.recommendations
                        .push("Working tree is dirty; commit or stash before merging.".into());
                }
            }
        }
        "build_project" => {
            p.summary = "Build the project".into();
            p.changes.push("Build artifacts will be regenerated".into());
            p.impact = "Writes to build output directories".into();
            p.reversibility = "Reversible by cleaning build outputs".into();
        }
        other => {
            p.summary = format!("Execute {other}");
            p.changes.push(format!("Parameters: {}", serde_json::Value::Object(params.clone())));
        }
    }
    if p.risk_level >= RiskLevel::High && p.recommendations.is_empty() {
        p.recommendations.push("Review the changes carefully before approving.".into());
    }
    p
}

fn preview_write(fs: &SafeFs, params: &ToolParams, p: &mut Preview) {
    let path = param(params, "file_path");
    let content = param(params, "content");
    p.content_preview = Some(truncate_chars(content, CONTENT_PREVIEW_CHARS));
    p.file_size = Some(content.len() as u64);
    let existing = fs.resolve(path).ok().and_then(|abs| std::fs::read_to_string(abs).ok());
    match existing {
        Some(old) => {
            p.summary = format!("Overwrite existing file {path}");
            let (removed, added) = change_counts(&old, content);
            p.changes.push(format!("Modify {path} (-{removed} +{added} lines)"));
            let diff = unified_diff(&old, content, "Current", "New");
            if !diff.is_empty() {
                p.diff = Some(diff);
            }
            p.reversibility = "Previous content is lost unless tracked by git".into();
        }
        None => {
            p.summary = format!("Create new file {path}");
            p.changes.push(format!("Create {path}"));
            p.reversibility = "Reversible by deleting the file".into();
        }
    }
    p.impact = format!("{} bytes written", content.len());
}

fn preview_delete(fs: &SafeFs, params: &ToolParams, p: &mut Preview) {
    let path = param(params, "file_path");
    p.summary = format!("Delete file {path}");
    p.changes.push(format!("Remove {path}"));
    p.impact = "File is removed from disk".into();
    p.reversibility = "Not reversible unless tracked by git".into();
    if let Some(meta) = fs.resolve(path).ok().and_then(|abs| std::fs::metadata(abs).ok()) {
        p.file_size = Some(meta.len());
    } else {
        p.recommendations.push(format!("{path} does not exist"));
    }
}
