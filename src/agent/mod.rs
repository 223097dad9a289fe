//! Agent：感知 → 推理 → 执行 → 学习 循环
//!
//! 所有组件（工具注册表、两层记忆、学习系统、安全框架、推理后端）由 AgentBuilder 显式构建并注入，
//! 同一进程可以同时存在多个互不影响的 Agent（测试即如此）。启动期只有工具注册表为空视为致命错误。

pub mod commands;
pub mod cycle;
pub mod multistep;
pub mod prompt;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::intent::IntentMatcher;
use crate::learning::{default_preferences, LearningPolicy, LearningSystem, AUTO_APPROVE_KEY};
use crate::llm::{providers_from_config, LlmClient, ReasoningBackend};
use crate::memory::{PersistentMemory, SessionSummary, WorkingMemory};
use crate::safety::{SafetyFramework, SafetyPolicy};
use crate::tools::{builtin_registry, ToolExecutor, ToolRegistry, DEFAULT_FORBIDDEN};
use crate::ui::{Presenter, TerminalUi};

pub use commands::{parse_command, parse_preference_value, Command};
pub use cycle::{Context, StepReport};
pub use multistep::{split_steps, STEP_DELIMITERS};

const INPUT_PROMPT: &str = "beecode> ";

/// 循环行为开关
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// 感知阶段取最近几次交互
    pub recent_interactions: usize,
    /// 破坏性操作成功后是否询问 good/bad
    pub solicit_feedback: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            recent_interactions: 3,
            solicit_feedback: true,
        }
    }
}

pub struct Agent {
    root: PathBuf,
    executor: ToolExecutor,
    safety: SafetyFramework,
    working: WorkingMemory,
    memory: Arc<PersistentMemory>,
    learning: LearningSystem,
    backend: ReasoningBackend,
    recovery: RecoveryEngine,
    ui: Arc<dyn Presenter>,
    settings: AgentSettings,
}

/// Agent 构建器；未指定的组件取默认（内置工具、内存库、终端 UI、无 provider）
pub struct AgentBuilder {
    root: PathBuf,
    registry: Option<ToolRegistry>,
    memory: Option<Arc<PersistentMemory>>,
    providers: Vec<Arc<dyn LlmClient>>,
    ui: Option<Arc<dyn Presenter>>,
    safety_policy: SafetyPolicy,
    learning_policy: LearningPolicy,
    settings: AgentSettings,
    tool_timeout_secs: u64,
    max_sessions: usize,
    reserved_tokens: usize,
    temperature: f32,
}

impl AgentBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry: None,
            memory: None,
            providers: Vec::new(),
            ui: None,
            safety_policy: SafetyPolicy::default(),
            learning_policy: LearningPolicy::default(),
            settings: AgentSettings::default(),
            tool_timeout_secs: 30,
            max_sessions: 10,
            reserved_tokens: 500,
            temperature: 0.3,
        }
    }

    /// 按配置填充策略、工具与 provider（持久记忆与 UI 仍需单独指定）
    pub fn from_config(cfg: &AppConfig) -> Self {
        let root = cfg.app.workspace_root();
        let registry = builtin_registry(
            &root,
            cfg.tools.shell.forbidden_patterns.clone(),
            cfg.tools.tool_timeout_secs,
        );
        let mut builder = Self::new(root)
            .with_registry(registry)
            .with_providers(providers_from_config(&cfg.llm))
            .with_safety_policy(cfg.safety.policy())
            .with_learning_policy(cfg.learning.policy())
            .with_settings(AgentSettings {
                recent_interactions: cfg.app.recent_interactions,
                solicit_feedback: cfg.learning.solicit_feedback,
            });
        builder.tool_timeout_secs = cfg.tools.tool_timeout_secs;
        builder.max_sessions = cfg.app.max_sessions;
        builder.reserved_tokens = cfg.llm.reserved_tokens;
        builder.temperature = cfg.llm.temperature;
        builder
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_memory(mut self, memory: Arc<PersistentMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_providers(mut self, providers: Vec<Arc<dyn LlmClient>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_presenter(mut self, ui: Arc<dyn Presenter>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_safety_policy(mut self, policy: SafetyPolicy) -> Self {
        self.safety_policy = policy;
        self
    }

    pub fn with_learning_policy(mut self, policy: LearningPolicy) -> Self {
        self.learning_policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let registry = match self.registry {
            Some(r) => r,
            None => builtin_registry(
                &self.root,
                DEFAULT_FORBIDDEN.iter().map(|s| s.to_string()).collect(),
                self.tool_timeout_secs,
            ),
        };
        if registry.is_empty() {
            return Err(AgentError::Startup("tool registry is empty".into()));
        }
        let memory = match self.memory {
            Some(m) => m,
            None => Arc::new(PersistentMemory::in_memory()?),
        };

        let matcher = IntentMatcher::new(registry.tool_names());
        let backend = ReasoningBackend::new(self.providers, matcher)
            .with_reserved_tokens(self.reserved_tokens)
            .with_temperature(self.temperature);
        tracing::info!(
            root = %self.root.display(),
            tools = registry.len(),
            providers = ?backend.provider_info().available,
            "agent built"
        );

        Ok(Agent {
            executor: ToolExecutor::new(registry, self.tool_timeout_secs),
            safety: SafetyFramework::new(&self.root, self.safety_policy),
            working: WorkingMemory::new(self.max_sessions),
            learning: LearningSystem::new(Arc::clone(&memory), self.learning_policy),
            memory,
            backend,
            recovery: RecoveryEngine::new(),
            ui: self
                .ui
                .unwrap_or_else(|| Arc::new(TerminalUi::new()) as Arc<dyn Presenter>),
            settings: self.settings,
            root: self.root,
        })
    }
}

/// 按配置创建 Agent：持久记忆打不开时退回内存库并告警
pub fn create_agent(cfg: &AppConfig, ui: Arc<dyn Presenter>) -> Result<Agent, AgentError> {
    let db_path = cfg.app.database_path();
    let memory = match PersistentMemory::open(&db_path) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %db_path.display(), "persistent memory unavailable, using in-memory store: {}", e);
            PersistentMemory::in_memory()?
        }
    };
    AgentBuilder::from_config(cfg)
        .with_memory(Arc::new(memory))
        .with_presenter(ui)
        .build()
}

impl Agent {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn working_memory(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn persistent_memory(&self) -> &Arc<PersistentMemory> {
        &self.memory
    }

    pub fn learning(&self) -> &LearningSystem {
        &self.learning
    }

    pub fn backend(&self) -> &ReasoningBackend {
        &self.backend
    }

    pub fn safety(&self) -> &SafetyFramework {
        &self.safety
    }

    /// 注册审批回调等
    pub fn safety_mut(&mut self) -> &mut SafetyFramework {
        &mut self.safety
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 开始会话，并从持久层载入会话偏好
    pub fn start_session(&mut self) -> String {
        let id = self.working.start_session(None);
        for (key, default) in default_preferences() {
            let value = if key == AUTO_APPROVE_KEY {
                json!(self.learning.auto_approve_enabled())
            } else {
                self.memory.get_preference(key, default).0
            };
            self.working.set_preference(key, value);
        }
        tracing::info!(session = %id, "session started");
        id
    }

    pub(crate) fn ensure_session(&mut self) -> String {
        match self.working.current_session_id() {
            Some(id) => id.to_string(),
            None => self.start_session(),
        }
    }

    /// 结束会话并展示摘要
    pub fn end_session(&mut self) -> Option<SessionSummary> {
        let summary = self.working.end_session()?;
        let rows = vec![
            ("Duration".to_string(), format!("{:.1}s", summary.duration_secs)),
            ("Interactions".to_string(), summary.total_interactions.to_string()),
            ("Success rate".to_string(), format!("{:.0}%", summary.success_rate * 100.0)),
            ("Unique errors".to_string(), summary.unique_errors.to_string()),
            ("Files accessed".to_string(), summary.files_accessed.to_string()),
        ];
        self.ui.display_table("Session summary", &rows);
        tracing::info!(session = %summary.session_id, interactions = summary.total_interactions, "session ended");
        Some(summary)
    }

    fn display_welcome(&self) {
        let text = match self.memory.get_memory_stats() {
            Ok(stats) if stats.interaction_history_count > 0 => format!(
                "Welcome back! I remember {} previous interactions ({:.0}% successful).",
                stats.interaction_history_count,
                stats.interaction_success_rate * 100.0
            ),
            Ok(_) => "Welcome to beecode! Ask me about this project, or type 'exit' to quit.".to_string(),
            Err(e) => {
                tracing::warn!("memory stats unavailable: {}", e);
                "Welcome to beecode!".to_string()
            }
        };
        self.ui.display(&text, None);
    }

    /// 交互主循环：直到 exit/quit 或输入结束
    pub async fn run(&mut self) -> Option<SessionSummary> {
        self.start_session();
        match self.backend.initialize().await {
            Some(provider) => self.ui.display(&format!("Reasoning backend: {provider}"), None),
            None => self.ui.display(
                "No reasoning backend reachable; using rule-based intent matching.",
                None,
            ),
        }
        self.display_welcome();

        while let Some(line) = self.ui.read_input(INPUT_PROMPT) {
            match parse_command(&line) {
                Command::Empty => continue,
                Command::Exit => break,
                Command::SetPreference { key, value } => self.set_preference(&key, value),
                Command::ShowPreferences => self.show_preferences(),
                Command::ShowLearning => self.show_learning(),
                Command::Usage(usage) => self.ui.display_error(&format!("Usage: {usage}")),
                Command::Request(text) => {
                    self.handle_request(&text).await;
                }
            }
        }
        self.end_session()
    }
}
