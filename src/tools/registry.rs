//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），由 ToolRegistry 按名注册与查找。
//! 参数在注册表边界统一规整：先展开 `{"required": {...}}` / `{"optional": {...}}` 包裹，
//! 再拆开 `{"default": x}` / `{"value": x}` 信封，最后按 ParameterSchema 校验并补齐默认值。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 已校验的关键字参数
pub type ToolParams = Map<String, Value>;

/// 参数声明：必填参数名 + 可选参数（名 -> 默认值）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    pub required: Vec<String>,
    pub optional: BTreeMap<String, Value>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_required(mut self, name: &str) -> Self {
        self.required.push(name.to_string());
        self
    }

    pub fn with_optional(mut self, name: &str, default: Value) -> Self {
        self.optional.insert(name.to_string(), default);
        self
    }

    /// 供 prompt 使用的简短描述
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "required": self.required,
            "optional": self.optional,
        })
    }
}

/// 工具执行结果：至少包含 success / message，其余字段由展示层按需渲染
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// 墙钟耗时（秒），由 Act 阶段填写
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    /// 工具特有的结构化字段
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// 错误文本（优先 error 字段，否则 message）
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.message)
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数声明、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（决策 JSON 中的 tool_name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数声明，默认无参数
    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::default()
    }

    /// 执行工具；params 已经过注册表校验
    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按字母序返回工具名
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description, parameters) 列表，按名称排序
    pub fn tool_descriptions(&self) -> Vec<(String, String, ParameterSchema)> {
        let mut out: Vec<_> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                (
                    name.clone(),
                    tool.description().to_string(),
                    tool.parameters(),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// 规整 + 校验参数：成功返回完整参数集，失败返回所有问题（从不 panic）
    pub fn validate(&self, name: &str, raw: &Value) -> Result<ToolParams, Vec<String>> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| vec![format!("Unknown tool: {name}")])?;
        validate_parameters(&tool.parameters(), raw)
    }

    /// 直接执行（不经过超时与审计，供 ToolExecutor 调用）
    pub async fn execute(&self, name: &str, params: &ToolParams) -> Result<ToolResult, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(params).await
    }
}

/// 展开 required/optional 包裹与 default/value 信封，得到扁平参数表
pub fn normalize_parameters(raw: &Value) -> ToolParams {
    let Some(obj) = raw.as_object() else {
        return ToolParams::new();
    };
    let mut flat = ToolParams::new();
    let mut wrapped = false;
    for key in ["required", "optional"] {
        if let Some(Value::Object(inner)) = obj.get(key) {
            wrapped = true;
            for (k, v) in inner {
                flat.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
    if !wrapped {
        flat = obj.clone();
    } else {
        // 包裹之外的同级键也保留
        for (k, v) in obj {
            if k != "required" && k != "optional" {
                flat.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
    flat.into_iter()
        .map(|(k, v)| (k, unwrap_envelope(v)))
        .collect()
}

/// `{"default": x}` / `{"value": x}`（可带 type/description）拆为 x
fn unwrap_envelope(v: Value) -> Value {
    let Value::Object(map) = &v else {
        return v;
    };
    let is_envelope = (map.contains_key("default") || map.contains_key("value"))
        && map
            .keys()
            .all(|k| matches!(k.as_str(), "default" | "value" | "type" | "description"));
    if !is_envelope {
        return v;
    }
    map.get("value")
        .or_else(|| map.get("default"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// 按声明校验：列出所有缺失的必填参数；可选参数缺失时以默认值补齐
pub fn validate_parameters(schema: &ParameterSchema, raw: &Value) -> Result<ToolParams, Vec<String>> {
    let mut params = normalize_parameters(raw);
    let errors: Vec<String> = schema
        .required
        .iter()
        .filter(|name| params.get(*name).map_or(true, Value::is_null))
        .map(|name| format!("Missing required parameter: {name}"))
        .collect();
    if !errors.is_empty() {
        return Err(errors);
    }
    for (name, default) in &schema.optional {
        match params.get(name) {
            Some(v) if !v.is_null() => {}
            _ => {
                params.insert(name.clone(), default.clone());
            }
        }
    }
    Ok(params)
}

/// 取字符串参数
pub fn str_param<'a>(params: &'a ToolParams, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Parameter '{name}' must be a string"))
}

/// 取整数参数（容忍字符串形式的数字）
pub fn u64_param(params: &ToolParams, name: &str, default: u64) -> u64 {
    match params.get(name) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// 取布尔参数（容忍 "true"/"false" 字符串）
pub fn bool_param(params: &ToolParams, name: &str, default: bool) -> bool {
    match params.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1"),
        _ => default,
    }
}
