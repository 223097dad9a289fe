//! 动作：推理阶段的输出，一次具体的工具调用

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 选中的工具调用：工具名 + 参数 + 理由
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub reasoning: String,
}

impl Action {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// file_path 参数（若有）
    pub fn file_path(&self) -> Option<&str> {
        self.parameters.get("file_path").and_then(Value::as_str)
    }
}
