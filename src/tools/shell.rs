//! run_command：在项目根目录执行 shell 命令
//!
//! 破坏性操作，执行前须经安全审批；另有一份禁止子串列表（rm -rf、mkfs、fork bomb 等），
//! 命中即拒绝。执行通过 sh -c / cmd /C，带超时与 tracing 审计。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::tools::{str_param, ParameterSchema, Tool, ToolParams, ToolResult};

/// 默认禁止的命令子串
pub const DEFAULT_FORBIDDEN: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    "curl | sh",
    ":(){ :|:& };:", // fork bomb
];

pub struct RunCommandTool {
    cwd: PathBuf,
    forbidden: Vec<String>,
    timeout_secs: u64,
}

impl RunCommandTool {
    pub fn new(cwd: impl AsRef<Path>, forbidden: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            forbidden: forbidden.into_iter().map(|s| s.to_lowercase()).collect(),
            timeout_secs,
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        if raw.trim().is_empty() {
            return Err("Empty command".to_string());
        }
        let lower = raw.to_lowercase();
        match self.forbidden.iter().find(|f| lower.contains(f.as_str())) {
            Some(f) => Err(format!("Forbidden pattern: {f}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory and capture its output"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("command")
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let command = str_param(params, "command")?.trim();
        self.check(command)?;

        tracing::info!(command = %command, "run_command execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.cwd).kill_on_drop(true);

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| format!("Command timed out after {}s", self.timeout_secs))?
        .map_err(|e| format!("Execution failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code();
        let result = if output.status.success() {
            ToolResult::ok(format!("Command succeeded: {command}"))
        } else {
            ToolResult::failure(
                format!("Exit {:?}: {}", code, stderr.trim()),
                format!("Command failed: {command}"),
            )
        };
        Ok(result
            .with_stdout(stdout)
            .with_data("stderr", json!(stderr))
            .with_data("exit_code", json!(code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(dir: &Path) -> RunCommandTool {
        RunCommandTool::new(
            dir,
            DEFAULT_FORBIDDEN.iter().map(|s| s.to_string()).collect(),
            10,
        )
    }

    #[tokio::test]
    async fn test_forbidden_pattern_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = ToolParams::new();
        p.insert("command".into(), json!("mkfs.ext4 /dev/sda1"));
        let err = tool(dir.path()).execute(&p).await.unwrap_err();
        assert!(err.contains("Forbidden"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = ToolParams::new();
        p.insert("command".into(), json!("echo hi"));
        let r = tool(dir.path()).execute(&p).await.unwrap();
        assert!(r.success);
        assert_eq!(r.stdout.as_deref().map(str::trim), Some("hi"));
    }
}
