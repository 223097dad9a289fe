//! 推理 prompt 构建
//!
//! system 消息：角色说明、可用工具（附本上下文下的历史效果）、决策 JSON Schema；
//! user 消息：工作目录、版本库、最近动作、推荐工具、学习洞察、用户偏好，最后一行是原始输入。

use serde_json::{Map, Value};

use crate::agent::Context;
use crate::llm::{Message, USER_INPUT_PREFIX};
use crate::memory::{Insight, ToolEffectiveness};
use crate::tools::{decision_schema_json, ParameterSchema};

/// prompt 中的一行工具说明
#[derive(Debug, Clone)]
pub struct ToolLine {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
    pub effectiveness: Option<ToolEffectiveness>,
}

const SYSTEM_HEADER: &str = "You are beecode, a coding assistant working inside a local project. \
For every request choose exactly one tool from the list below and fill in its parameters. \
Use paths relative to the project root.";

fn describe_tool(line: &ToolLine) -> String {
    let mut out = format!("- {}: {}", line.name, line.description);
    if !line.parameters.required.is_empty() {
        out.push_str(&format!(" required: [{}]", line.parameters.required.join(", ")));
    }
    if !line.parameters.optional.is_empty() {
        let optional: Vec<String> = line
            .parameters
            .optional
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        out.push_str(&format!(" optional: [{}]", optional.join(", ")));
    }
    if let Some(eff) = line.effectiveness.filter(|e| e.usage_count > 0) {
        out.push_str(&format!(
            " (success {:.0}% over {} uses here)",
            eff.success_rate * 100.0,
            eff.usage_count
        ));
    }
    out
}

fn describe_insight(insight: &Insight) -> String {
    format!(
        "- [{}] {} (confidence {:.2})",
        insight.insight_type.as_str(),
        insight.data,
        insight.confidence
    )
}

/// 组装发送给推理后端的消息
pub fn build_messages(
    ctx: &Context,
    tools: &[ToolLine],
    insights: &[Insight],
    preferences: &Map<String, Value>,
) -> Vec<Message> {
    let tool_block: Vec<String> = tools.iter().map(describe_tool).collect();
    let system = format!(
        "{SYSTEM_HEADER}\n\nAvailable tools:\n{}\n\nRespond with a single JSON object matching this schema and nothing else:\n{}",
        tool_block.join("\n"),
        decision_schema_json()
    );

    let mut user = Vec::new();
    user.push(format!("Working directory: {}", ctx.working_directory));
    user.push(format!("Git: {}", ctx.vcs.summary()));
    if !ctx.recent_interactions.is_empty() {
        user.push("Recent actions:".to_string());
        for i in &ctx.recent_interactions {
            user.push(format!(
                "- \"{}\" -> {} ({})",
                i.user_input,
                i.action.tool_name,
                if i.success { "ok" } else { "failed" }
            ));
        }
    }
    if !ctx.summary.files_in_memory.is_empty() {
        user.push(format!("Files already read: {}", ctx.summary.files_in_memory.join(", ")));
    }
    if !ctx.recommendations.is_empty() {
        user.push("Recommended tools:".to_string());
        for r in &ctx.recommendations {
            user.push(format!("- {} ({})", r.tool_name, r.reason));
        }
    }
    if !ctx.predictions.is_empty() {
        user.push(format!("Predicted needs: {}", ctx.predictions.join("; ")));
    }
    if !insights.is_empty() {
        user.push("Learned insights:".to_string());
        user.extend(insights.iter().map(describe_insight));
    }
    if !preferences.is_empty() {
        let prefs: Vec<String> = preferences.iter().map(|(k, v)| format!("{k}={v}")).collect();
        user.push(format!("User preferences: {}", prefs.join(", ")));
    }
    user.push(format!("{USER_INPUT_PREFIX} {}", ctx.user_input));

    vec![Message::system(system), Message::user(user.join("\n"))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VcsStatus;
    use crate::llm::cascade::extract_user_input;
    use serde_json::json;

    fn ctx(input: &str) -> Context {
        Context {
            user_input: input.to_string(),
            working_directory: "/work".to_string(),
            vcs: VcsStatus {
                is_git_repo: true,
                branch: Some("main".into()),
                is_dirty: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn read_file_line(effectiveness: Option<ToolEffectiveness>) -> ToolLine {
        ToolLine {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: ParameterSchema::new().with_required("file_path"),
            effectiveness,
        }
    }

    #[test]
    fn test_user_input_is_last_line() {
        let msgs = build_messages(&ctx("what's in package.json"), &[read_file_line(None)], &[], &Map::new());
        assert_eq!(msgs.len(), 2);
        assert_eq!(extract_user_input(&msgs), "what's in package.json");
        assert!(msgs[1].content.contains("dirty"));
        assert!(msgs[0].content.contains("tool_name"));
    }

    #[test]
    fn test_effectiveness_annotation_only_when_used() {
        let seen = ToolEffectiveness {
            success_rate: 0.75,
            usage_count: 4,
            avg_execution_time: 0.1,
            confidence: 0.4,
        };
        let unseen = ToolEffectiveness {
            success_rate: 0.5,
            usage_count: 0,
            avg_execution_time: 0.0,
            confidence: 0.0,
        };
        assert!(describe_tool(&read_file_line(Some(seen))).contains("success 75% over 4 uses"));
        assert!(!describe_tool(&read_file_line(Some(unseen))).contains("success"));
        assert!(describe_tool(&read_file_line(None)).contains("required: [file_path]"));
    }

    #[test]
    fn test_predictions_rendered() {
        let mut c = ctx("ls");
        c.predictions = vec!["Likely to use git_status tool".into()];
        let msgs = build_messages(&c, &[], &[], &Map::new());
        assert!(msgs[1].content.contains("Predicted needs: Likely to use git_status tool"));
    }

    #[test]
    fn test_preferences_rendered() {
        let mut prefs = Map::new();
        prefs.insert("verbosity".into(), json!("high"));
        let msgs = build_messages(&ctx("ls"), &[], &[], &prefs);
        assert!(msgs[1].content.contains("verbosity=\"high\""));
    }
}
