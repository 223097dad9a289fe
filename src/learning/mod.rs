//! 学习系统：每次交互同步写入效果统计与文件知识，再在后台挖掘洞察
//!
//! 挖掘任务有自己的错误边界：失败只记日志，循环从不等待它。

pub mod insights;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::core::VcsStatus;
use crate::memory::{Insight, InsightType, Interaction, MemoryStats, PersistentMemory, PreferenceRecord};

pub use insights::{classify_error, default_generators, time_of_day, InsightGenerator, Observation};

pub const AUTO_APPROVE_KEY: &str = "auto_approve";
pub const COMMUNICATION_STYLE_KEY: &str = "communication_style";
pub const TECHNICAL_LEVEL_KEY: &str = "technical_level";

/// 从反馈措辞推断出的偏好写入时的置信度
const STYLE_CONFIDENCE: f64 = 0.7;
/// 预测下一步需求时用户模式洞察的置信度下限（不含）
const PREDICTION_FLOOR: f64 = 0.6;

/// 反馈与推荐的可调参数
#[derive(Debug, Clone, PartialEq)]
pub struct LearningPolicy {
    pub feedback_step: f64,
    pub auto_approve_threshold: f64,
    pub recommendation_floor: f64,
}

impl Default for LearningPolicy {
    fn default() -> Self {
        Self {
            feedback_step: 0.1,
            auto_approve_threshold: 0.8,
            recommendation_floor: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Good,
    Bad,
}

impl Feedback {
    /// 解析 good/bad（含 y/n 等同义），其他输入视为跳过
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "good" | "g" | "yes" | "y" | "+" => Some(Feedback::Good),
            "bad" | "b" | "no" | "n" | "-" => Some(Feedback::Bad),
            _ => None,
        }
    }

    /// 只看第一个词，"good, but more concise" 也算 good
    pub fn parse_leading(text: &str) -> Option<Self> {
        let first = text
            .split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!')
            .find(|w| !w.is_empty())?;
        Self::parse(first)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolRecommendation {
    /// 来源洞察，推荐被执行后回写采用统计
    pub insight_id: i64,
    pub tool_name: String,
    pub confidence: f64,
    pub success_rate: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningSummary {
    pub total_interactions_analyzed: i64,
    pub high_effectiveness_tools: usize,
    pub discovered_patterns: usize,
    pub error_patterns: usize,
    pub memory_stats: MemoryStats,
    pub top_insights: BTreeMap<String, Vec<Insight>>,
    /// 偏离默认值的用户偏好
    pub user_preferences: Vec<PreferenceRecord>,
}

/// 默认偏好值，摘要中只列出与之不同的偏好
pub fn default_preferences() -> Vec<(&'static str, Value)> {
    vec![
        ("verbosity", json!("normal")),
        (AUTO_APPROVE_KEY, json!(false)),
        ("show_diffs", json!(true)),
        (COMMUNICATION_STYLE_KEY, json!("balanced")),
    ]
}

/// 项目上下文模式：项目标记文件 + 脏工作区；都不满足时为 general
pub fn context_pattern(project_dir: &Path, vcs: Option<&VcsStatus>) -> String {
    const MARKERS: &[(&str, &str)] = &[
        ("Cargo.toml", "rust"),
        ("package.json", "nodejs"),
        ("pyproject.toml", "python"),
        ("requirements.txt", "python"),
        ("setup.py", "python"),
        ("pom.xml", "java"),
        ("build.gradle", "java"),
    ];
    let mut parts: Vec<&str> = Vec::new();
    for (file, tag) in MARKERS {
        if project_dir.join(file).exists() && !parts.contains(tag) {
            parts.push(tag);
        }
    }
    if vcs.map(|v| v.is_dirty).unwrap_or(false) {
        parts.push("dirty_repo");
    }
    if parts.is_empty() {
        "general".to_string()
    } else {
        parts.join("_")
    }
}

/// 当前模式与洞察的模式相同，或包含它（rust 的洞察适用于 rust_dirty_repo）
pub fn context_matches(current: &str, learned: &str) -> bool {
    current == learned || current.contains(learned)
}

pub struct LearningSystem {
    memory: Arc<PersistentMemory>,
    generators: Arc<Vec<Box<dyn InsightGenerator>>>,
    policy: LearningPolicy,
}

impl LearningSystem {
    pub fn new(memory: Arc<PersistentMemory>, policy: LearningPolicy) -> Self {
        Self {
            memory,
            generators: Arc::new(default_generators()),
            policy,
        }
    }

    pub fn with_generators(mut self, generators: Vec<Box<dyn InsightGenerator>>) -> Self {
        self.generators = Arc::new(generators);
        self
    }

    pub fn memory(&self) -> &Arc<PersistentMemory> {
        &self.memory
    }

    pub fn policy(&self) -> &LearningPolicy {
        &self.policy
    }

    /// 同步写入交互、工具统计与文件知识，然后派发后台挖掘
    ///
    /// 有 tokio 运行时时返回挖掘任务的句柄（测试可等待），否则在独立线程中运行并返回 None。
    pub fn record_interaction(
        &self,
        interaction: &Interaction,
        context_hash: &str,
        context_pattern: &str,
        duration_secs: f64,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if let Err(e) = self.memory.record_interaction(interaction) {
            tracing::warn!("failed to persist interaction: {}", e);
        }
        let tool = &interaction.action.tool_name;
        if let Err(e) = self
            .memory
            .record_tool_usage(tool, context_hash, interaction.success, duration_secs)
        {
            tracing::warn!(tool = %tool, "failed to record tool usage: {}", e);
        }
        if let Some(path) = interaction.action.file_path() {
            let content = if tool == "read_file" {
                interaction.result.content.as_deref()
            } else {
                interaction.action.parameters.get("content").and_then(Value::as_str)
            };
            let metadata = json!({ "last_tool": tool });
            if let Err(e) = self.memory.update_file_knowledge(path, content, Some(&metadata)) {
                tracing::warn!(path, "failed to update file knowledge: {}", e);
            }
        }
        if let Some(project) = interaction.project_path.as_deref() {
            let data = json!({ "context_pattern": context_pattern });
            if let Err(e) = self
                .memory
                .record_project_pattern(project, tool, &data, interaction.success)
            {
                tracing::warn!(project, "failed to record project pattern: {}", e);
            }
        }

        let obs = Observation::new(interaction.clone(), context_hash, context_pattern, duration_secs);
        let memory = Arc::clone(&self.memory);
        let generators = Arc::clone(&self.generators);
        let job = move || mine_insights(&obs, &memory, &generators);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn_blocking(job)),
            Err(_) => {
                std::thread::spawn(job);
                None
            }
        }
    }

    /// 置信度不低于下限、上下文模式匹配的高效工具，取前 3 个
    pub fn get_tool_recommendations(&self, context_pattern: &str, task: &str) -> Vec<ToolRecommendation> {
        let insights = match self.memory.get_learning_insights(Some(InsightType::ToolEffectiveness)) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("failed to load effectiveness insights: {}", e);
                return Vec::new();
            }
        };
        let mut out: Vec<ToolRecommendation> = Vec::new();
        for insight in insights {
            if insight.confidence < self.policy.recommendation_floor {
                continue;
            }
            let Some(pattern) = insight.data.get("context_pattern").and_then(Value::as_str) else {
                continue;
            };
            if !context_matches(context_pattern, pattern) {
                continue;
            }
            let Some(tool) = insight.data.get("tool_name").and_then(Value::as_str) else {
                continue;
            };
            if out.iter().any(|r| r.tool_name == tool) {
                continue;
            }
            let success_rate = insight.data.get("success_rate").and_then(Value::as_f64).unwrap_or(0.0);
            out.push(ToolRecommendation {
                insight_id: insight.id,
                tool_name: tool.to_string(),
                confidence: insight.confidence,
                success_rate,
                reason: format!("{:.0}% success in {} projects", success_rate * 100.0, pattern),
            });
            if out.len() == 3 {
                break;
            }
        }
        tracing::debug!(task, count = out.len(), "tool recommendations");
        out
    }

    /// 执行的工具来自某条推荐时，回写该洞察的采用次数与成功率
    pub fn record_recommendation_outcome(&self, recommendations: &[ToolRecommendation], tool: &str, success: bool) {
        let Some(rec) = recommendations.iter().find(|r| r.tool_name == tool) else {
            return;
        };
        if let Err(e) = self.memory.mark_insight_applied(rec.insight_id, success) {
            tracing::warn!(tool, "failed to mark insight applied: {}", e);
        }
    }

    /// 从自由文本反馈推断沟通风格与技术深度，返回写入的偏好
    pub fn adapt_communication_style(&self, feedback: &[&str]) -> Vec<(&'static str, Value)> {
        let text = feedback.join(" ").to_lowercase();
        if text.trim().is_empty() {
            return Vec::new();
        }
        let mut adapted = Vec::new();
        if text.contains("verbose") || text.contains("detailed") {
            adapted.push((COMMUNICATION_STYLE_KEY, json!("verbose")));
        } else if text.contains("concise") || text.contains("brief") {
            adapted.push((COMMUNICATION_STYLE_KEY, json!("concise")));
        }
        if text.contains("technical") {
            adapted.push((TECHNICAL_LEVEL_KEY, json!("high")));
        } else if text.contains("simple") || text.contains("basic") {
            adapted.push((TECHNICAL_LEVEL_KEY, json!("low")));
        }
        for (key, value) in &adapted {
            if let Err(e) = self.memory.store_preference(key, value, STYLE_CONFIDENCE) {
                tracing::warn!(key, "failed to store communication preference: {}", e);
            }
        }
        adapted
    }

    /// 当前时段下成功过的用户模式所对应的工具，取前 3 个
    pub fn predict_user_needs(&self, hour: u32) -> Vec<String> {
        let insights = match self.memory.get_learning_insights(Some(InsightType::UserPatterns)) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("failed to load user patterns: {}", e);
                return Vec::new();
            }
        };
        let feature = time_of_day(hour);
        let mut tools: Vec<String> = Vec::new();
        for insight in insights {
            if insight.confidence <= PREDICTION_FLOOR {
                continue;
            }
            let matches_time = insight
                .data
                .get("context_features")
                .and_then(Value::as_array)
                .map(|fs| fs.iter().any(|f| f.as_str() == Some(feature)))
                .unwrap_or(false);
            let Some(tool) = insight.data.get("tool_name").and_then(Value::as_str) else {
                continue;
            };
            if matches_time && !tools.iter().any(|t| t == tool) {
                tools.push(tool.to_string());
            }
            if tools.len() == 3 {
                break;
            }
        }
        tools.into_iter().map(|t| format!("Likely to use {t} tool")).collect()
    }

    /// 对一次重要操作的 good/bad 反馈；破坏性工具同时调整 auto_approve
    pub fn learn_from_feedback(&self, tool: &str, feedback: Feedback, destructive: bool) {
        let (key, value) = match feedback {
            Feedback::Good => (format!("positive_feedback_{tool}"), json!("good")),
            Feedback::Bad => (format!("negative_feedback_{tool}"), json!("bad")),
        };
        if let Err(e) = self.memory.store_preference(&key, &value, 0.8) {
            tracing::warn!(key = %key, "failed to store feedback: {}", e);
        }
        if destructive {
            self.apply_auto_approve_feedback(feedback);
        }
    }

    /// good：(true, c + step)，bad：(false, c - step)，截断到 [0, 1]
    pub fn apply_auto_approve_feedback(&self, feedback: Feedback) -> (bool, f64) {
        let (_, confidence) = self.memory.get_preference(AUTO_APPROVE_KEY, json!(false));
        let step = self.policy.feedback_step;
        let (value, confidence) = match feedback {
            Feedback::Good => (true, (confidence + step).min(1.0)),
            Feedback::Bad => (false, (confidence - step).max(0.0)),
        };
        let confidence = (confidence * 1e6).round() / 1e6;
        if let Err(e) = self.memory.store_preference(AUTO_APPROVE_KEY, &json!(value), confidence) {
            tracing::warn!("failed to update auto_approve: {}", e);
        }
        (value, confidence)
    }

    /// auto_approve 为 true 且置信度达到阈值时才生效
    pub fn auto_approve_enabled(&self) -> bool {
        let (value, confidence) = self.memory.get_preference(AUTO_APPROVE_KEY, json!(false));
        value.as_bool().unwrap_or(false) && confidence >= self.policy.auto_approve_threshold
    }

    /// 学习覆盖摘要；内部失败时返回全零摘要
    pub fn get_learning_summary(&self) -> LearningSummary {
        match self.try_summary() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("learning summary unavailable: {}", e);
                LearningSummary::default()
            }
        }
    }

    fn try_summary(&self) -> Result<LearningSummary, crate::core::StoreError> {
        let stats = self.memory.get_memory_stats()?;
        let mut summary = LearningSummary {
            total_interactions_analyzed: stats.interaction_history_count,
            memory_stats: stats,
            ..Default::default()
        };
        for kind in InsightType::ALL {
            let insights = self.memory.get_learning_insights(Some(kind))?;
            match kind {
                InsightType::ToolEffectiveness => {
                    let mut tools: Vec<&str> = insights
                        .iter()
                        .filter_map(|i| i.data.get("tool_name").and_then(Value::as_str))
                        .collect();
                    tools.sort_unstable();
                    tools.dedup();
                    summary.high_effectiveness_tools = tools.len();
                }
                InsightType::UserPatterns => summary.discovered_patterns = insights.len(),
                InsightType::ErrorPatterns => summary.error_patterns = insights.len(),
                InsightType::ProjectStructure => {}
            }
            if !insights.is_empty() {
                summary
                    .top_insights
                    .insert(kind.as_str().to_string(), insights.into_iter().take(3).collect());
            }
        }
        let defaults = default_preferences();
        summary.user_preferences = self
            .memory
            .all_preferences()?
            .into_iter()
            .filter(|p| {
                !defaults
                    .iter()
                    .any(|(k, v)| *k == p.key && *v == p.value)
            })
            .collect();
        Ok(summary)
    }
}

/// 后台挖掘：逐个生成器运行并持久化，失败只记日志
fn mine_insights(obs: &Observation, memory: &PersistentMemory, generators: &[Box<dyn InsightGenerator>]) {
    for generator in generators {
        let kind = generator.kind();
        match generator.generate(obs, memory) {
            Ok(found) => {
                for (data, confidence) in found {
                    if let Err(e) = memory.store_learning_insight(kind, &data, confidence) {
                        tracing::warn!(kind = %kind, "failed to store insight: {}", e);
                    }
                }
            }
            Err(e) => tracing::warn!(kind = %kind, "insight generator failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Action, ToolResult};

    fn system() -> LearningSystem {
        LearningSystem::new(Arc::new(PersistentMemory::in_memory().unwrap()), LearningPolicy::default())
    }

    #[test]
    fn test_context_pattern() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(context_pattern(dir.path(), None), "general");
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let dirty = VcsStatus {
            is_git_repo: true,
            is_dirty: true,
            ..VcsStatus::not_a_repo()
        };
        assert_eq!(context_pattern(dir.path(), Some(&dirty)), "rust_dirty_repo");
    }

    #[tokio::test]
    async fn test_record_interaction_persists_and_mines() {
        let learning = system();
        let action = Action::new("read_file").with_param("file_path", json!("README.md"));
        let interaction = Interaction::new("s1", "read readme file", action, ToolResult::ok("ok").with_content("# hi"))
            .with_project_path("/work/demo");
        let handle = learning.record_interaction(&interaction, "ctx", "general", 0.05);
        handle.unwrap().await.unwrap();

        let memory = learning.memory();
        assert_eq!(memory.get_recent_interactions(10).unwrap().len(), 1);
        assert_eq!(memory.get_tool_effectiveness("read_file", "ctx").unwrap().usage_count, 1);
        let fk = memory.get_file_knowledge("README.md").unwrap().unwrap();
        assert!(fk.content_hash.is_some());
        assert_eq!(memory.get_memory_stats().unwrap().project_patterns_count, 1);
        let patterns = memory.get_learning_insights(Some(InsightType::UserPatterns)).unwrap();
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn test_record_interaction_without_runtime_returns_none() {
        let learning = system();
        let interaction = Interaction::new("s1", "list", Action::new("list_directory"), ToolResult::ok("ok"));
        assert!(learning.record_interaction(&interaction, "ctx", "general", 0.01).is_none());
        assert_eq!(learning.memory().get_recent_interactions(5).unwrap().len(), 1);
    }

    #[test]
    fn test_recommendations_respect_floor_and_pattern() {
        let learning = system();
        let memory = learning.memory();
        let insight = |tool: &str, pattern: &str| {
            json!({"type": "high_effectiveness_tool", "tool_name": tool, "context_pattern": pattern, "success_rate": 1.0})
        };
        memory.store_learning_insight(InsightType::ToolEffectiveness, &insight("git_status", "rust"), 0.9).unwrap();
        memory.store_learning_insight(InsightType::ToolEffectiveness, &insight("read_file", "rust"), 0.5).unwrap();
        memory.store_learning_insight(InsightType::ToolEffectiveness, &insight("list_directory", "python"), 1.0).unwrap();
        memory.store_learning_insight(InsightType::ToolEffectiveness, &insight("git_status", "rust"), 0.8).unwrap();

        let recs = learning.get_tool_recommendations("rust", "check status");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].tool_name, "git_status");
        // 同一工具与模式的新洞察取代旧洞察
        assert!((recs[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_recommendations_apply_to_narrower_context() {
        let learning = system();
        let data = json!({"type": "high_effectiveness_tool", "tool_name": "list_directory", "context_pattern": "rust", "success_rate": 1.0});
        learning
            .memory()
            .store_learning_insight(InsightType::ToolEffectiveness, &data, 0.9)
            .unwrap();

        let recs = learning.get_tool_recommendations("rust_dirty_repo", "list files");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].tool_name, "list_directory");
        assert!(learning.get_tool_recommendations("python", "list files").is_empty());
        assert!(context_matches("rust", "rust"));
        assert!(!context_matches("rust", "rust_dirty_repo"));
    }

    #[test]
    fn test_recommendation_outcome_marks_insight_applied() {
        let learning = system();
        let data = json!({"type": "high_effectiveness_tool", "tool_name": "git_status", "context_pattern": "rust", "success_rate": 1.0});
        learning
            .memory()
            .store_learning_insight(InsightType::ToolEffectiveness, &data, 0.9)
            .unwrap();
        let recs = learning.get_tool_recommendations("rust", "status");

        learning.record_recommendation_outcome(&recs, "read_file", true);
        learning.record_recommendation_outcome(&recs, "git_status", true);
        learning.record_recommendation_outcome(&recs, "git_status", false);

        let stored = learning
            .memory()
            .get_learning_insights(Some(InsightType::ToolEffectiveness))
            .unwrap();
        assert_eq!(stored[0].times_applied, 2);
        assert!((stored[0].success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_auto_approve_feedback_moves_confidence() {
        let learning = system();
        assert!(!learning.auto_approve_enabled());
        let mut last = (false, 0.0);
        for _ in 0..8 {
            last = learning.apply_auto_approve_feedback(Feedback::Good);
        }
        assert_eq!(last, (true, 0.8));
        assert!(learning.auto_approve_enabled());

        let (value, confidence) = learning.apply_auto_approve_feedback(Feedback::Bad);
        assert!(!value);
        assert!((confidence - 0.7).abs() < 1e-9);
        assert!(!learning.auto_approve_enabled());
    }

    #[test]
    fn test_feedback_stores_tool_preference() {
        let learning = system();
        learning.learn_from_feedback("write_file", Feedback::Bad, false);
        let (value, confidence) = learning
            .memory()
            .get_preference("negative_feedback_write_file", Value::Null);
        assert_eq!(value, json!("bad"));
        assert!((confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_summary_counts_and_non_default_prefs() {
        let learning = system();
        let memory = learning.memory();
        memory.store_preference("verbosity", &json!("normal"), 0.8).unwrap();
        memory.store_preference("show_diffs", &json!(false), 0.8).unwrap();
        memory
            .store_learning_insight(InsightType::ErrorPatterns, &json!({"type": "timeout_error"}), 0.8)
            .unwrap();
        let summary = learning.get_learning_summary();
        assert_eq!(summary.error_patterns, 1);
        assert_eq!(summary.user_preferences.len(), 1);
        assert_eq!(summary.user_preferences[0].key, "show_diffs");
        assert!(summary.top_insights.contains_key("error_patterns"));
    }

    #[test]
    fn test_adapt_communication_style() {
        let learning = system();
        assert!(learning.adapt_communication_style(&[]).is_empty());
        let adapted = learning.adapt_communication_style(&["Good, but keep it brief", "and more technical"]);
        assert_eq!(
            adapted,
            vec![
                (COMMUNICATION_STYLE_KEY, json!("concise")),
                (TECHNICAL_LEVEL_KEY, json!("high")),
            ]
        );
        let (style, confidence) = learning
            .memory()
            .get_preference(COMMUNICATION_STYLE_KEY, json!("balanced"));
        assert_eq!(style, json!("concise"));
        assert!((confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_predict_user_needs_by_time_of_day() {
        let learning = system();
        let memory = learning.memory();
        let pattern = |p: &str, tool: &str, feature: &str| {
            json!({"type": "input_tool_pattern", "pattern": p, "tool_name": tool, "context_features": [feature]})
        };
        memory
            .store_learning_insight(InsightType::UserPatterns, &pattern("read_config", "read_file", "work_hours"), 0.7)
            .unwrap();
        memory
            .store_learning_insight(InsightType::UserPatterns, &pattern("status_git", "git_status", "off_hours"), 0.7)
            .unwrap();
        memory
            .store_learning_insight(InsightType::UserPatterns, &pattern("list_files", "list_directory", "work_hours"), 0.5)
            .unwrap();

        assert_eq!(learning.predict_user_needs(10), vec!["Likely to use read_file tool".to_string()]);
        assert_eq!(learning.predict_user_needs(22), vec!["Likely to use git_status tool".to_string()]);
    }

    #[test]
    fn test_feedback_parse() {
        assert_eq!(Feedback::parse(" Good "), Some(Feedback::Good));
        assert_eq!(Feedback::parse("bad"), Some(Feedback::Bad));
        assert_eq!(Feedback::parse(""), None);
        assert_eq!(Feedback::parse_leading("good, but be concise"), Some(Feedback::Good));
        assert_eq!(Feedback::parse_leading("  "), None);
        assert_eq!(Feedback::parse_leading("more detail please"), None);
    }
}
