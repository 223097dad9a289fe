//! 不经过推理后端的特殊命令：set preference / show preferences / show learning / exit

use serde_json::{json, Number, Value};

use crate::agent::Agent;
use crate::learning::AUTO_APPROVE_KEY;

/// 显式设置的偏好写入持久层时使用的置信度
const EXPLICIT_PREFERENCE_CONFIDENCE: f64 = 0.8;

/// 一行输入的分类
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Exit,
    SetPreference { key: String, value: Value },
    ShowPreferences,
    ShowLearning,
    /// 格式错误的特殊命令，附用法说明
    Usage(&'static str),
    Request(String),
}

/// 解析一行输入；关键字不区分大小写，偏好值保留原文
pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "" => return Command::Empty,
        "exit" | "quit" => return Command::Exit,
        "show preferences" => return Command::ShowPreferences,
        "show learning" => return Command::ShowLearning,
        _ => {}
    }
    if lower == "set preference" || lower.starts_with("set preference ") {
        let rest = trimmed["set preference".len()..].trim();
        return match rest.split_once(char::is_whitespace) {
            Some((key, value)) if !value.trim().is_empty() => Command::SetPreference {
                key: key.to_string(),
                value: parse_preference_value(value.trim()),
            },
            _ => Command::Usage("set preference <key> <value>"),
        };
    }
    Command::Request(trimmed.to_string())
}

/// true/yes/on 与 false/no/off 为布尔，其次整数、有限浮点，否则字符串
pub fn parse_preference_value(raw: &str) -> Value {
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "on" => return Value::Bool(true),
        "false" | "no" | "off" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Agent {
    /// 同时写入持久层与当前会话
    pub fn set_preference(&mut self, key: &str, value: Value) {
        if let Err(e) = self
            .memory
            .store_preference(key, &value, EXPLICIT_PREFERENCE_CONFIDENCE)
        {
            tracing::warn!(key, "failed to persist preference: {}", e);
        }
        let session_value = if key == AUTO_APPROVE_KEY {
            json!(self.learning.auto_approve_enabled())
        } else {
            value.clone()
        };
        self.working.set_preference(key, session_value);
        self.ui
            .display(&format!("Preference '{key}' set to {}", display_value(&value)), None);
    }

    pub fn show_preferences(&self) {
        let rows: Vec<(String, String)> = self
            .working
            .preferences()
            .iter()
            .map(|(k, v)| (k.clone(), display_value(v)))
            .collect();
        self.ui.display_table("Preferences", &rows);
    }

    pub fn show_learning(&self) {
        let summary = self.learning.get_learning_summary();
        let approvals = self.safety.approval_statistics();
        let stats = &summary.memory_stats;
        let mut rows = vec![
            ("Interactions analyzed".to_string(), summary.total_interactions_analyzed.to_string()),
            ("High-effectiveness tools".to_string(), summary.high_effectiveness_tools.to_string()),
            ("Discovered patterns".to_string(), summary.discovered_patterns.to_string()),
            ("Error patterns".to_string(), summary.error_patterns.to_string()),
            ("Stored insights".to_string(), stats.learning_insights_count.to_string()),
            ("Known files".to_string(), stats.file_knowledge_count.to_string()),
            (
                "Interaction success rate".to_string(),
                format!("{:.0}%", stats.interaction_success_rate * 100.0),
            ),
            ("Approval decisions".to_string(), approvals.total.to_string()),
        ];
        if approvals.total > 0 {
            rows.push((
                "Approval rate".to_string(),
                format!("{:.0}%", approvals.approval_rate * 100.0),
            ));
        }
        for pref in &summary.user_preferences {
            rows.push((
                format!("Preference {}", pref.key),
                format!("{} (confidence {:.2})", display_value(&pref.value), pref.confidence),
            ));
        }
        self.ui.display_table("Learning", &rows);

        for (kind, insights) in &summary.top_insights {
            let lines: Vec<String> = insights
                .iter()
                .map(|i| format!("{} (confidence {:.2})", i.data, i.confidence))
                .collect();
            self.ui.display(&lines.join("\n"), Some(kind.as_str()));
        }
    }
}
