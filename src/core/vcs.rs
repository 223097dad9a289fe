//! 版本库状态快照
//!
//! 通过 `git status --porcelain=v1 --branch` 读取分支、脏状态与文件列表；
//! 非仓库或未安装 git 时返回 is_git_repo=false，从不报错。

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// 某一时刻的版本库状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsStatus {
    pub is_git_repo: bool,
    pub branch: Option<String>,
    pub is_dirty: bool,
    pub untracked_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub staged_files: Vec<String>,
}

impl VcsStatus {
    /// 非仓库目录的快照
    pub fn not_a_repo() -> Self {
        Self::default()
    }

    /// 读取 dir 所在仓库的状态
    pub async fn snapshot(dir: &Path) -> Self {
        let output = Command::new("git")
            .args(["status", "--porcelain=v1", "--branch"])
            .current_dir(dir)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                Self::parse_porcelain(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                tracing::debug!(
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "git status failed, treating as non-repo"
                );
                Self::not_a_repo()
            }
            Err(e) => {
                tracing::debug!("git unavailable: {}", e);
                Self::not_a_repo()
            }
        }
    }

    /// 解析 porcelain v1 输出（首行 `## branch...upstream`）
    pub fn parse_porcelain(text: &str) -> Self {
        let mut status = VcsStatus {
            is_git_repo: true,
            ..Default::default()
        };
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("## ") {
                let name = rest.split("...").next().unwrap_or(rest).trim();
                let name = name.strip_prefix("No commits yet on ").unwrap_or(name);
                status.branch = Some(name.to_string());
                continue;
            }
            if line.len() < 4 {
                continue;
            }
            let (code, path) = line.split_at(2);
            let path = path.trim().to_string();
            let mut chars = code.chars();
            let index = chars.next().unwrap_or(' ');
            let worktree = chars.next().unwrap_or(' ');
            if code == "??" {
                status.untracked_files.push(path);
                continue;
            }
            if index != ' ' {
                status.staged_files.push(path.clone());
            }
            if worktree != ' ' {
                status.modified_files.push(path);
            }
        }
        status.is_dirty = !status.untracked_files.is_empty()
            || !status.modified_files.is_empty()
            || !status.staged_files.is_empty();
        status
    }

    /// 单行摘要，用于 prompt 与上下文摘要
    pub fn summary(&self) -> String {
        if !self.is_git_repo {
            return "not a git repository".to_string();
        }
        format!(
            "branch {}, {} ({} staged, {} modified, {} untracked)",
            self.branch.as_deref().unwrap_or("unknown"),
            if self.is_dirty { "dirty" } else { "clean" },
            self.staged_files.len(),
            self.modified_files.len(),
            self.untracked_files.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain() {
        let text = "## main...origin/main\nM  src/lib.rs\n M README.md\nMM Cargo.toml\n?? notes.txt\n";
        let s = VcsStatus::parse_porcelain(text);
        assert!(s.is_git_repo);
        assert!(s.is_dirty);
        assert_eq!(s.branch.as_deref(), Some("main"));
        assert_eq!(s.staged_files, vec!["src/lib.rs", "Cargo.toml"]);
        assert_eq!(s.modified_files, vec!["README.md", "Cargo.toml"]);
        assert_eq!(s.untracked_files, vec!["notes.txt"]);
    }

    #[test]
    fn test_parse_clean_repo() {
        let s = VcsStatus::parse_porcelain("## No commits yet on master\n");
        assert!(!s.is_dirty);
        assert_eq!(s.branch.as_deref(), Some("master"));
    }

    #[tokio::test]
    async fn test_snapshot_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let s = VcsStatus::snapshot(dir.path()).await;
        // tempdir 通常不在仓库内；若 git 不存在同样得到非仓库
        if !s.is_git_repo {
            assert!(!s.is_dirty);
            assert_eq!(s.summary(), "not a git repository");
        }
    }
}
