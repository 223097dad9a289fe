//! 单次循环的四个阶段：perceive → reason → act → learn
//!
//! 各阶段严格顺序执行；工具错误在 act 边界转为失败结果，持久化错误在各组件内部降级，
//! 因此循环本身不返回错误。

use std::time::Instant;

use chrono::{Local, Timelike};
use serde_json::{json, Map, Value};

use crate::agent::prompt::{build_messages, ToolLine};
use crate::agent::Agent;
use crate::core::{AgentError, VcsStatus};
use crate::learning::{context_pattern, Feedback, ToolRecommendation, AUTO_APPROVE_KEY};
use crate::llm::DecisionSource;
use crate::memory::{generate_context_hash, ContextSummary, Interaction};
use crate::safety::is_destructive;
use crate::tools::{Action, ToolResult};

/// prompt 中附带的洞察条数
const PROMPT_INSIGHTS: usize = 5;

/// 感知阶段的产物，创建后不再修改
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub user_input: String,
    pub working_directory: String,
    pub vcs: VcsStatus,
    pub recent_interactions: Vec<Interaction>,
    pub summary: ContextSummary,
    pub recommendations: Vec<ToolRecommendation>,
    /// 按当前时段从用户模式推测的下一步需求
    pub predictions: Vec<String>,
    /// {directory, is_dirty, session_id} 的指纹
    pub context_hash: String,
    pub context_pattern: String,
}

/// 一步的结果
#[derive(Debug, Clone)]
pub struct StepReport {
    pub action: Action,
    pub result: ToolResult,
}

impl Agent {
    /// 完整跑一次四阶段循环
    pub async fn process_input(&mut self, input: &str) -> StepReport {
        let ctx = self.perceive(input).await;
        let action = self.reason(&ctx).await;
        let result = self.act(&action, &ctx.vcs).await;
        self.learn(&ctx, &action, &result);
        StepReport { action, result }
    }

    pub async fn perceive(&mut self, input: &str) -> Context {
        let session_id = self.ensure_session();
        let vcs = VcsStatus::snapshot(&self.root).await;
        let directory = self.root.display().to_string();
        self.working.set_current_directory(directory.clone());
        self.working.set_git_status(vcs.clone());

        let pattern = context_pattern(&self.root, Some(&vcs));
        let context_hash = generate_context_hash(&json!({
            "directory": directory,
            "is_dirty": vcs.is_dirty,
            "session_id": session_id,
        }));
        Context {
            user_input: input.trim().to_string(),
            working_directory: directory,
            recent_interactions: self.working.recent_interactions(self.settings.recent_interactions),
            summary: self.working.context_summary(),
            recommendations: self.learning.get_tool_recommendations(&pattern, input),
            predictions: self.learning.predict_user_needs(Local::now().hour()),
            vcs,
            context_hash,
            context_pattern: pattern,
        }
    }

    /// 询问推理后端；返回的工具不在注册表中时改用规则匹配
    pub async fn reason(&self, ctx: &Context) -> Action {
        let tools: Vec<ToolLine> = self
            .executor
            .registry()
            .tool_descriptions()
            .into_iter()
            .map(|(name, description, parameters)| {
                let effectiveness = match self.memory.get_tool_effectiveness(&name, &ctx.context_hash) {
                    Ok(eff) => Some(eff),
                    Err(e) => {
                        tracing::debug!(tool = %name, "effectiveness unavailable: {}", e);
                        None
                    }
                };
                ToolLine {
                    name,
                    description,
                    parameters,
                    effectiveness,
                }
            })
            .collect();
        let insights = match self.memory.get_learning_insights(None) {
            Ok(mut v) => {
                v.truncate(PROMPT_INSIGHTS);
                v
            }
            Err(e) => {
                tracing::warn!("failed to load insights for prompt: {}", e);
                Vec::new()
            }
        };
        let messages = build_messages(ctx, &tools, &insights, &self.working.preferences());

        let decision = self.backend.generate_structured(&messages).await;
        if !self.executor.registry().contains(&decision.action.tool_name) {
            tracing::warn!(tool = %decision.action.tool_name, "decision names an unregistered tool");
            return self.backend.matcher().match_input(&ctx.user_input);
        }
        match &decision.source {
            DecisionSource::Provider(p) => tracing::info!(provider = %p, tool = %decision.action.tool_name, "action chosen"),
            DecisionSource::Fallback => tracing::info!(tool = %decision.action.tool_name, "action chosen by rule-based matcher"),
        }
        decision.action
    }

    /// 校验、审批、执行；总是返回结果（失败以 success=false 表示）
    pub async fn act(&mut self, action: &Action, vcs: &VcsStatus) -> ToolResult {
        let start = Instant::now();
        let mut result = self.act_inner(action, vcs).await;
        result.execution_time = Some(start.elapsed().as_secs_f64());
        result
    }

    async fn act_inner(&mut self, action: &Action, vcs: &VcsStatus) -> ToolResult {
        let tool = action.tool_name.as_str();
        if !self.executor.registry().contains(tool) {
            let err = AgentError::UnknownTool(tool.to_string());
            return ToolResult::failure(format!("Tool {tool} not found"), "Unknown tool requested")
                .with_suggestions(self.recovery.handle(tool, &err));
        }

        let raw = Value::Object(action.parameters.clone());
        let params = match self.executor.registry().validate(tool, &raw) {
            Ok(p) => p,
            Err(errors) => {
                tracing::info!(tool, ?errors, "parameter validation failed");
                return ToolResult::failure(
                    format!("Parameter validation failed: {}", errors.join("; ")),
                    "Invalid parameters",
                )
                .with_data("validation_errors", json!(errors));
            }
        };

        if is_destructive(tool) && !self.working.bool_preference(AUTO_APPROVE_KEY, false) {
            let outcome = self
                .safety
                .request_approval(tool, &params, Some(vcs), self.ui.as_ref());
            if !outcome.approved {
                return ToolResult::failure(
                    "Operation cancelled by user",
                    format!("User cancelled the {tool} operation"),
                )
                .with_data("cancelled", json!(true));
            }
        }

        let mut result = match self.executor.execute(tool, &params).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(tool, "tool execution failed: {}", e);
                let suggestions = self.recovery.handle(tool, &e);
                return ToolResult::failure(e.to_string(), format!("{tool} failed")).with_suggestions(suggestions);
            }
        };
        if !result.success && result.suggestions.is_empty() {
            let suggestions = self.recovery.suggest(tool, result.error_text());
            result.suggestions = suggestions;
        }

        if tool == "read_file" && result.success {
            if let (Some(path), Some(content)) = (
                params.get("file_path").and_then(Value::as_str),
                result.content.as_deref(),
            ) {
                let mut metadata = Map::new();
                metadata.insert("size".to_string(), json!(content.len()));
                self.working.cache_file(path, content, metadata);
            }
        }
        result
    }

    /// 写入两层记忆并派发后台挖掘；破坏性操作成功后按配置征求反馈
    pub fn learn(&mut self, ctx: &Context, action: &Action, result: &ToolResult) {
        let session_id = self.ensure_session();
        let interaction = Interaction::new(session_id, ctx.user_input.as_str(), action.clone(), result.clone())
            .with_project_path(ctx.working_directory.as_str());
        self.working.add_interaction(interaction.clone());
        self.learning
            .record_recommendation_outcome(&ctx.recommendations, &action.tool_name, result.success);

        let duration = result.execution_time.unwrap_or(0.0);
        // 挖掘任务自带错误边界，循环不等待
        drop(self.learning.record_interaction(
            &interaction,
            &ctx.context_hash,
            &ctx.context_pattern,
            duration,
        ));

        if self.settings.solicit_feedback && result.success && is_destructive(&action.tool_name) {
            self.solicit_feedback(&action.tool_name);
        }
    }

    fn solicit_feedback(&mut self, tool: &str) {
        let answer = self
            .ui
            .prompt(&format!("How did {tool} go? (good/bad, Enter to skip): "));
        for (key, value) in self.learning.adapt_communication_style(&[answer.as_str()]) {
            self.working.set_preference(key, value);
        }
        let Some(feedback) = Feedback::parse_leading(&answer) else {
            return;
        };
        self.learning.learn_from_feedback(tool, feedback, true);
        let enabled = self.learning.auto_approve_enabled();
        self.working.set_preference(AUTO_APPROVE_KEY, json!(enabled));
        tracing::info!(tool, ?feedback, auto_approve = enabled, "feedback recorded");
    }
}
