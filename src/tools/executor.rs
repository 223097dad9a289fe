//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, params) 在超时内调用 registry.execute，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolParams, ToolRegistry, ToolResult};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, params: &ToolParams) -> Result<ToolResult, AgentError> {
        if !self.registry.contains(tool_name) {
            return Err(AgentError::UnknownTool(tool_name.to_string()));
        }
        let start = Instant::now();
        let args_preview = args_preview(params);
        let result = timeout(self.timeout, self.registry.execute(tool_name, params)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(r)) if r.success => (true, "ok"),
            Ok(Ok(_)) => (false, "failed"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(params: &ToolParams) -> String {
    let s = serde_json::Value::Object(params.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _params: &ToolParams) -> Result<ToolResult, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::ok("late"))
        }
    }

    #[tokio::test]
    async fn test_executor_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let exec = ToolExecutor::new(registry, 1);
        let err = exec.execute("slow", &ToolParams::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_executor_unknown_tool() {
        let exec = ToolExecutor::new(ToolRegistry::new(), 1);
        let err = exec.execute("ghost", &ToolParams::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));
    }
}
