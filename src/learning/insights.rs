//! 洞察生成器：每次交互后在后台依次运行，产出 {data, confidence}

use chrono::{Local, Timelike};
use serde_json::{json, Value};

use crate::core::StoreError;
use crate::memory::{Interaction, InsightType, PersistentMemory};

/// 洞察挖掘的输入
#[derive(Debug, Clone)]
pub struct Observation {
    pub interaction: Interaction,
    pub context_hash: String,
    pub context_pattern: String,
    pub duration_secs: f64,
    /// 本地小时（0-23）
    pub hour: u32,
}

impl Observation {
    pub fn new(interaction: Interaction, context_hash: &str, context_pattern: &str, duration_secs: f64) -> Self {
        Self {
            interaction,
            context_hash: context_hash.to_string(),
            context_pattern: context_pattern.to_string(),
            duration_secs,
            hour: Local::now().hour(),
        }
    }
}

pub trait InsightGenerator: Send + Sync {
    fn kind(&self) -> InsightType;

    fn generate(&self, obs: &Observation, memory: &PersistentMemory) -> Result<Vec<(Value, f64)>, StoreError>;
}

/// 默认的四个生成器
pub fn default_generators() -> Vec<Box<dyn InsightGenerator>> {
    vec![
        Box::new(ToolEffectivenessInsights),
        Box::new(UserPatternInsights),
        Box::new(ProjectStructureInsights),
        Box::new(ErrorPatternInsights),
    ]
}

/// 某上下文下使用 > 3 次且成功率 > 80% 的工具
pub struct ToolEffectivenessInsights;

impl InsightGenerator for ToolEffectivenessInsights {
    fn kind(&self) -> InsightType {
        InsightType::ToolEffectiveness
    }

    fn generate(&self, obs: &Observation, memory: &PersistentMemory) -> Result<Vec<(Value, f64)>, StoreError> {
        let tool = &obs.interaction.action.tool_name;
        let eff = memory.get_tool_effectiveness(tool, &obs.context_hash)?;
        if eff.usage_count > 3 && eff.success_rate > 0.8 {
            let data = json!({
                "type": "high_effectiveness_tool",
                "tool_name": tool,
                "context_pattern": obs.context_pattern,
                "success_rate": eff.success_rate,
                "avg_execution_time": eff.avg_execution_time,
            });
            Ok(vec![(data, (eff.usage_count as f64 / 10.0).min(1.0))])
        } else {
            Ok(Vec::new())
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "what", "please", "show", "could", "would",
    "about", "into", "have", "some",
];

/// 09-17 点为 work_hours，其余为 off_hours
pub fn time_of_day(hour: u32) -> &'static str {
    if (9..17).contains(&hour) {
        "work_hours"
    } else {
        "off_hours"
    }
}

/// 输入关键词签名 + 选中的工具（仅成功时）
pub struct UserPatternInsights;

/// 前 3 个关键词（小写，长度 > 3，去停用词）
pub fn keyword_signature(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 3 && !STOP_WORDS.contains(&w.as_str()))
        .take(3)
        .collect()
}

impl InsightGenerator for UserPatternInsights {
    fn kind(&self) -> InsightType {
        InsightType::UserPatterns
    }

    fn generate(&self, obs: &Observation, _memory: &PersistentMemory) -> Result<Vec<(Value, f64)>, StoreError> {
        if !obs.interaction.success {
            return Ok(Vec::new());
        }
        let words = keyword_signature(&obs.interaction.user_input);
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let tool = &obs.interaction.action.tool_name;
        let data = json!({
            "type": "input_tool_pattern",
            "pattern": format!("{}_{}", words.join("_"), tool),
            "keywords": words,
            "tool_name": tool,
            "context_features": [time_of_day(obs.hour)],
        });
        Ok(vec![(data, 0.7)])
    }
}

const IMPORTANT_ACCESS_COUNT: i64 = 3;

/// 频繁访问的文件标记为重要
pub struct ProjectStructureInsights;

impl InsightGenerator for ProjectStructureInsights {
    fn kind(&self) -> InsightType {
        InsightType::ProjectStructure
    }

    fn generate(&self, obs: &Observation, memory: &PersistentMemory) -> Result<Vec<(Value, f64)>, StoreError> {
        let Some(path) = obs.interaction.action.file_path() else {
            return Ok(Vec::new());
        };
        let Some(knowledge) = memory.get_file_knowledge(path)? else {
            return Ok(Vec::new());
        };
        if knowledge.access_count < IMPORTANT_ACCESS_COUNT {
            return Ok(Vec::new());
        }
        let importance = (0.5 + knowledge.access_count as f64 * 0.1).min(1.0);
        memory.set_file_importance(path, importance)?;
        // 只在跨过阈值时记一条，之后只更新重要度
        if knowledge.access_count > IMPORTANT_ACCESS_COUNT {
            return Ok(Vec::new());
        }
        let data = json!({
            "type": "important_file",
            "file_path": path,
            "file_type": knowledge.file_type,
            "access_count": knowledge.access_count,
        });
        Ok(vec![(data, 0.6)])
    }
}

/// 错误消息分类；无法归类返回 None
pub fn classify_error(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("no such file") {
        if lower.contains("module") {
            Some("module_not_found")
        } else {
            Some("file_not_found")
        }
    } else if lower.contains("permission") || lower.contains("access denied") {
        Some("permission_error")
    } else if lower.contains("timeout") || lower.contains("timed out") {
        Some("timeout_error")
    } else if lower.contains("syntax") {
        Some("syntax_error")
    } else if lower.contains("no module named") || lower.contains("cannot find module") {
        Some("module_not_found")
    } else {
        None
    }
}

pub struct ErrorPatternInsights;

impl InsightGenerator for ErrorPatternInsights {
    fn kind(&self) -> InsightType {
        InsightType::ErrorPatterns
    }

    fn generate(&self, obs: &Observation, _memory: &PersistentMemory) -> Result<Vec<(Value, f64)>, StoreError> {
        let result = &obs.interaction.result;
        if result.success {
            return Ok(Vec::new());
        }
        let message = result.error_text();
        Ok(classify_error(message)
            .map(|category| {
                let data = json!({
                    "type": category,
                    "tool_name": obs.interaction.action.tool_name,
                    "error": message,
                    "user_input": obs.interaction.user_input,
                });
                vec![(data, 0.8)]
            })
            .unwrap_or_default())
    }
}
