//! Agent 循环集成测试：规则兜底、未知工具、参数校验、审批记忆、多步请求、特殊命令

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use beecode::agent::{AgentBuilder, AgentSettings, Context};
    use beecode::core::{LlmError, VcsStatus};
    use beecode::llm::{CompletionOptions, LlmClient, Message};
    use beecode::memory::InsightType;
    use beecode::safety::SafetyPolicy;
    use beecode::tools::{Action, ParameterSchema, Tool, ToolParams, ToolRegistry, ToolResult};
    use beecode::ui::ScriptedUi;
    use beecode::Agent;
    use serde_json::json;

    /// 记录调用次数的工具
    struct RecordingTool {
        name: &'static str,
        required: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "records calls"
        }

        fn parameters(&self) -> ParameterSchema {
            self.required
                .iter()
                .fold(ParameterSchema::new(), |s, r| s.with_required(r))
        }

        async fn execute(&self, _params: &ToolParams) -> Result<ToolResult, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::ok("recorded"))
        }
    }

    /// 总是失败的 provider
    struct FailingClient(&'static str);

    #[async_trait]
    impl LlmClient for FailingClient {
        fn name(&self) -> &str {
            self.0
        }

        fn model(&self) -> &str {
            "gpt-4"
        }

        async fn probe(&self) -> Result<(), LlmError> {
            Err(LlmError::Unavailable("offline".into()))
        }

        async fn complete(&self, _messages: &[Message], _options: &CompletionOptions) -> Result<String, LlmError> {
            Err(LlmError::Http("connection refused".into()))
        }
    }

    /// 固定回复的 provider
    struct ScriptedClient(String);

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "gpt-4"
        }

        async fn probe(&self) -> Result<(), LlmError> {
            Ok(())
        }

        async fn complete(&self, _messages: &[Message], _options: &CompletionOptions) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn quiet() -> AgentSettings {
        AgentSettings {
            recent_interactions: 3,
            solicit_feedback: false,
        }
    }

    fn builtin_agent(dir: &std::path::Path, ui: Arc<ScriptedUi>) -> Agent {
        AgentBuilder::new(dir)
            .with_presenter(ui)
            .with_settings(quiet())
            .build()
            .unwrap()
    }

    fn recording_agent(dir: &std::path::Path, tool: RecordingTool) -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        AgentBuilder::new(dir)
            .with_registry(registry)
            .with_presenter(Arc::new(ScriptedUi::default()))
            .with_settings(quiet())
            .build()
            .unwrap()
    }

    fn dirty_context(input: &str) -> Context {
        Context {
            user_input: input.to_string(),
            working_directory: "/project".to_string(),
            vcs: VcsStatus {
                is_git_repo: true,
                branch: Some("main".into()),
                is_dirty: true,
                modified_files: vec!["src/lib.rs".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fallback_reads_package_json_in_dirty_repo() {
        let dir = tempfile::tempdir().unwrap();
        let agent = builtin_agent(dir.path(), Arc::new(ScriptedUi::default()));
        let action = agent.reason(&dirty_context("what's in package.json")).await;
        assert_eq!(action.tool_name, "read_file");
        assert_eq!(action.parameters.len(), 1);
        assert_eq!(action.parameters["file_path"], json!("package.json"));
    }

    #[tokio::test]
    async fn test_followed_recommendation_is_marked_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let mut agent = builtin_agent(dir.path(), Arc::new(ScriptedUi::default()));
        let data = json!({
            "type": "high_effectiveness_tool",
            "tool_name": "list_directory",
            "context_pattern": "rust",
            "success_rate": 1.0,
        });
        agent
            .persistent_memory()
            .store_learning_insight(InsightType::ToolEffectiveness, &data, 0.9)
            .unwrap();

        let ctx = agent.perceive("list files").await;
        assert_eq!(ctx.recommendations.len(), 1);
        let report = agent.process_input("list files").await;
        assert_eq!(report.action.tool_name, "list_directory");
        assert!(report.result.success);

        let insights = agent
            .persistent_memory()
            .get_learning_insights(Some(InsightType::ToolEffectiveness))
            .unwrap();
        let followed = insights.iter().find(|i| i.data["context_pattern"] == "rust").unwrap();
        assert_eq!(followed.times_applied, 1);
        assert!((followed.success_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_never_executed() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut agent = recording_agent(
            dir.path(),
            RecordingTool {
                name: "record",
                required: vec![],
                calls: Arc::clone(&calls),
            },
        );
        let result = agent
            .act(&Action::new("no_such_tool"), &VcsStatus::not_a_repo())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Tool no_such_tool not found"));
        assert_eq!(result.message, "Unknown tool requested");
        assert!(result.execution_time.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_parameters_are_all_listed() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut agent = recording_agent(
            dir.path(),
            RecordingTool {
                name: "record",
                required: vec!["path", "content"],
                calls: Arc::clone(&calls),
            },
        );
        let result = agent
            .act(
                &Action::new("record").with_param("path", json!(null)),
                &VcsStatus::not_a_repo(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.message, "Invalid parameters");
        let errors = result.data["validation_errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(result.error_text().contains("path"));
        assert!(result.error_text().contains("content"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrapped_parameters_are_flattened_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut agent = recording_agent(
            dir.path(),
            RecordingTool {
                name: "record",
                required: vec!["path"],
                calls: Arc::clone(&calls),
            },
        );
        let action = Action::new("record").with_param("required", json!({"path": {"default": "a.txt"}}));
        let result = agent.act(&action, &VcsStatus::not_a_repo()).await;
        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_providers_failing_still_yields_registered_action() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AgentBuilder::new(dir.path())
            .with_providers(vec![
                Arc::new(FailingClient("primary")) as Arc<dyn LlmClient>,
                Arc::new(FailingClient("secondary")) as Arc<dyn LlmClient>,
            ])
            .with_presenter(Arc::new(ScriptedUi::default()))
            .build()
            .unwrap();
        assert_eq!(agent.backend().initialize().await, None);
        for input in ["list files", "git status", "do something vague"] {
            let action = agent.reason(&dirty_context(input)).await;
            assert!(agent.executor().registry().contains(&action.tool_name), "{input}");
        }
    }

    #[tokio::test]
    async fn test_unparsable_reply_falls_back_to_matcher() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AgentBuilder::new(dir.path())
            .with_providers(vec![Arc::new(ScriptedClient("I think you should read it".into())) as Arc<dyn LlmClient>])
            .with_presenter(Arc::new(ScriptedUi::default()))
            .build()
            .unwrap();
        let action = agent.reason(&dirty_context("read notes.md")).await;
        assert_eq!(action.tool_name, "read_file");
        assert_eq!(action.file_path(), Some("notes.md"));
    }

    #[tokio::test]
    async fn test_provider_decision_runs_and_caches_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let reply = r#"Sure: {"tool_name": "read_file", "parameters": {"file_path": "a.txt"}, "reasoning": "user asked"}"#;
        let mut agent = AgentBuilder::new(dir.path())
            .with_providers(vec![Arc::new(ScriptedClient(reply.into())) as Arc<dyn LlmClient>])
            .with_presenter(Arc::new(ScriptedUi::default()))
            .with_settings(quiet())
            .build()
            .unwrap();
        agent.start_session();
        let report = agent.process_input("open the greeting file").await;
        assert_eq!(report.action.tool_name, "read_file");
        assert!(report.result.success);
        assert_eq!(report.result.content.as_deref(), Some("hello"));

        let summary = agent.working_memory().context_summary();
        assert_eq!(summary.files_in_memory, vec!["a.txt".to_string()]);
        assert_eq!(summary.recent_actions, vec!["read_file".to_string()]);
        let stats = agent.persistent_memory().get_memory_stats().unwrap();
        assert_eq!(stats.interaction_history_count, 1);
        assert_eq!(stats.tool_effectiveness_count, 1);
    }

    #[tokio::test]
    async fn test_remembered_approval_skips_callback() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = AgentBuilder::new(dir.path())
            .with_presenter(Arc::new(ScriptedUi::default()))
            .with_safety_policy(SafetyPolicy {
                initial_confidence: 0.8,
                ..SafetyPolicy::default()
            })
            .with_settings(quiet())
            .build()
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        agent.safety_mut().register_approval_callback(
            "write_file",
            Arc::new(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
        );

        let action = Action::new("write_file")
            .with_param("file_path", json!("out.txt"))
            .with_param("content", json!("data"));
        let first = agent.act(&action, &VcsStatus::not_a_repo()).await;
        let second = agent.act(&action, &VcsStatus::not_a_repo()).await;
        assert!(first.success && second.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "data");
        assert_eq!(agent.safety().approval_statistics().total, 2);
    }

    #[tokio::test]
    async fn test_denied_approval_cancels_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedUi::new(["n"]));
        let mut agent = builtin_agent(dir.path(), Arc::clone(&ui));
        let action = Action::new("write_file")
            .with_param("file_path", json!("out.txt"))
            .with_param("content", json!("data"));
        let result = agent.act(&action, &VcsStatus::not_a_repo()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Operation cancelled by user"));
        assert_eq!(result.message, "User cancelled the write_file operation");
        assert!(!dir.path().join("out.txt").exists());
        assert!(ui.output().iter().any(|l| l.starts_with("[Approval required]")));
    }

    #[tokio::test]
    async fn test_multistep_stops_when_user_declines() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedUi::new(["n"]));
        let mut agent = builtin_agent(dir.path(), Arc::clone(&ui));
        agent.start_session();
        let reports = agent
            .handle_request("read missing1.txt and then read missing2.txt")
            .await;
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].result.success);
        assert!(ui.prompts().iter().any(|p| p.starts_with("Continue with remaining steps")));
    }

    #[tokio::test]
    async fn test_multistep_runs_every_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "B").unwrap();
        let ui = Arc::new(ScriptedUi::default());
        let mut agent = builtin_agent(dir.path(), Arc::clone(&ui));
        let reports = agent.handle_request("read a.txt and then read b.txt").await;
        let contents: Vec<_> = reports.iter().map(|r| r.result.content.clone().unwrap_or_default()).collect();
        assert_eq!(contents, vec!["A", "B"]);
        assert!(ui.output().iter().any(|l| l.starts_with("[Step 2/2]")));
    }

    #[tokio::test]
    async fn test_run_loop_handles_special_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedUi::new([
            "set preference verbosity high",
            "show preferences",
            "list files",
            "show learning",
            "exit",
        ]));
        let mut agent = builtin_agent(dir.path(), Arc::clone(&ui));
        let summary = agent.run().await.unwrap();
        assert_eq!(summary.total_interactions, 1);
        assert_eq!(summary.successful_interactions, 1);

        let out = ui.output();
        assert!(out.iter().any(|l| l == "verbosity: high"));
        assert!(out.iter().any(|l| l == "[Learning]"));
        assert!(out.iter().any(|l| l == "[Session summary]"));
        assert_eq!(
            agent.persistent_memory().get_preference("verbosity", json!("normal")),
            (json!("high"), 0.8)
        );
    }

    #[tokio::test]
    async fn test_feedback_after_destructive_success_updates_auto_approve() {
        let dir = tempfile::tempdir().unwrap();
        // 第一个答案用于审批，第二个用于反馈
        let ui = Arc::new(ScriptedUi::new(["y", "good"]));
        let mut agent = AgentBuilder::new(dir.path())
            .with_presenter(Arc::clone(&ui) as Arc<dyn beecode::ui::Presenter>)
            .build()
            .unwrap();
        agent.start_session();
        let ctx = agent.perceive("write it").await;
        let action = Action::new("write_file")
            .with_param("file_path", json!("note.txt"))
            .with_param("content", json!("x"));
        let result = agent.act(&action, &ctx.vcs).await;
        assert!(result.success);
        agent.learn(&ctx, &action, &result);

        let (value, confidence) = agent
            .persistent_memory()
            .get_preference("auto_approve", json!(false));
        assert_eq!(value, json!(true));
        assert!((confidence - 0.1).abs() < 1e-9);
        // 置信度未达阈值，会话内仍需审批
        assert!(!agent.working_memory().bool_preference("auto_approve", true));
    }

    #[tokio::test]
    async fn test_feedback_wording_adapts_communication_style() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedUi::new(["y", "good, but keep it brief"]));
        let mut agent = AgentBuilder::new(dir.path())
            .with_presenter(Arc::clone(&ui) as Arc<dyn beecode::ui::Presenter>)
            .build()
            .unwrap();
        agent.start_session();
        let ctx = agent.perceive("write it").await;
        let action = Action::new("write_file")
            .with_param("file_path", json!("note.txt"))
            .with_param("content", json!("x"));
        let result = agent.act(&action, &ctx.vcs).await;
        agent.learn(&ctx, &action, &result);

        assert_eq!(
            agent.working_memory().get_preference("communication_style"),
            Some(&json!("concise"))
        );
        let (value, _) = agent
            .persistent_memory()
            .get_preference("auto_approve", json!(false));
        assert_eq!(value, json!(true));
    }

    #[tokio::test]
    async fn test_empty_registry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let built = AgentBuilder::new(dir.path())
            .with_registry(ToolRegistry::new())
            .with_presenter(Arc::new(ScriptedUi::default()))
            .build();
        assert!(built.is_err());
    }
}
