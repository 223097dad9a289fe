//! Git 工具：git_status / git_diff / git_commit
//!
//! 直接调用 git 命令行，工作目录为项目根。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::core::VcsStatus;
use crate::tools::{bool_param, str_param, ParameterSchema, Tool, ToolParams, ToolResult};

async fn run_git(args: &[&str], cwd: &Path) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| format!("Failed to run git: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(format!("git {} failed: {}", args.join(" "), detail.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub struct GitStatusTool {
    project_root: PathBuf,
}

impl GitStatusTool {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the git branch and changed files"
    }

    async fn execute(&self, _params: &ToolParams) -> Result<ToolResult, String> {
        let status = VcsStatus::snapshot(&self.project_root).await;
        if !status.is_git_repo {
            return Ok(ToolResult::failure(
                "Not a git repository",
                format!("{} is not a git repository", self.project_root.display()),
            ));
        }
        let mut items = Vec::new();
        items.extend(status.staged_files.iter().map(|f| format!("staged:    {f}")));
        items.extend(status.modified_files.iter().map(|f| format!("modified:  {f}")));
        items.extend(status.untracked_files.iter().map(|f| format!("untracked: {f}")));
        let data = serde_json::to_value(&status).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(status.summary())
            .with_items(items)
            .with_data("git_status", data))
    }
}

pub struct GitDiffTool {
    project_root: PathBuf,
}

impl GitDiffTool {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show unstaged changes, or staged changes with staged=true"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_optional("staged", json!(false))
            .with_optional("file", json!(""))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let mut args = vec!["diff"];
        if bool_param(params, "staged", false) {
            args.push("--cached");
        }
        let file = str_param(params, "file").unwrap_or("");
        if !file.is_empty() {
            args.push("--");
            args.push(file);
        }
        let diff = run_git(&args, &self.project_root).await?;
        if diff.trim().is_empty() {
            return Ok(ToolResult::ok("No changes found."));
        }
        let files = diff.lines().filter(|l| l.starts_with("diff --git")).count();
        Ok(ToolResult::ok(format!("{files} file(s) changed")).with_diff(diff))
    }
}

pub struct GitCommitTool {
    project_root: PathBuf,
}

impl GitCommitTool {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Stage files (default: all) and commit them with a message"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("message")
            .with_optional("files", json!([]))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let message = str_param(params, "message")?;
        let files: Vec<&str> = params
            .get("files")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default();

        let mut add_args = vec!["add"];
        if files.is_empty() {
            add_args.push(".");
        } else {
            add_args.extend(files.iter().copied());
        }
        run_git(&add_args, &self.project_root).await?;

        let stdout = run_git(&["commit", "-m", message], &self.project_root).await?;
        Ok(ToolResult::ok(format!("Committed: {message}")).with_stdout(stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_git_status_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let r = GitStatusTool::new(dir.path())
            .execute(&ToolParams::new())
            .await
            .unwrap();
        // tempdir 不在仓库中时返回失败结果而不是 Err
        if !r.success {
            assert_eq!(r.error_text(), "Not a git repository");
        }
    }

    #[test]
    fn test_commit_requires_message() {
        let tool = GitCommitTool::new(".");
        assert_eq!(tool.parameters().required, vec!["message".to_string()]);
    }
}
