//! 决策 JSON Schema 生成（schemars）
//!
//! 将推理后端应返回的 `{"tool_name", "parameters", "reasoning"}` 结构注入 prompt，减少格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 决策格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DecisionFormat {
    /// 要调用的工具名，必须是可用工具之一
    pub tool_name: String,
    /// 工具参数（键为参数名）
    pub parameters: HashMap<String, serde_json::Value>,
    /// 选择该工具的简短理由
    pub reasoning: String,
}

/// 返回决策的 JSON Schema 字符串，可拼入 prompt
pub fn decision_schema_json() -> String {
    let schema = schema_for!(DecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let s = decision_schema_json();
        assert!(s.contains("tool_name"));
        assert!(s.contains("parameters"));
        assert!(s.contains("reasoning"));
    }
}
