//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEECODE__*` 覆盖（双下划线表示嵌套，如 `BEECODE__SAFETY__CONFIDENCE_THRESHOLD=0.9`）。
//! 凭据只从环境变量读取（OPENAI_API_KEY / GROQ_API_KEY），不进入配置文件。

use std::path::PathBuf;

use serde::Deserialize;

use crate::learning::LearningPolicy;
use crate::safety::SafetyPolicy;
use crate::tools::DEFAULT_FORBIDDEN;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmConfig,
    pub safety: SafetySection,
    pub learning: LearningSection,
    pub tools: ToolsSection,
}

/// [app] 段：工作目录、数据库、会话上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 项目根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 持久记忆路径；":memory:" 表示不落盘
    pub database_path: Option<PathBuf>,
    pub max_sessions: usize,
    /// 感知阶段取最近几次交互
    pub recent_interactions: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            database_path: None,
            max_sessions: 10,
            recent_interactions: 3,
        }
    }
}

impl AppSection {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// 默认 ~/.beecode/memory.db，取不到主目录时退回工作目录下 .beecode/memory.db
    pub fn database_path(&self) -> PathBuf {
        if let Some(p) = &self.database_path {
            return p.clone();
        }
        let base = dirs::home_dir().unwrap_or_else(|| self.workspace_root());
        base.join(".beecode").join("memory.db")
    }
}

/// [llm] 段：provider 顺序、各 provider 模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider_order: Vec<String>,
    pub openai: OpenAiSection,
    pub groq: GroqSection,
    pub ollama: OllamaSection,
    pub timeouts: LlmTimeoutsSection,
    /// 为回复预留的 token
    pub reserved_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_order: vec!["openai".into(), "groq".into(), "ollama".into()],
            openai: OpenAiSection::default(),
            groq: GroqSection::default(),
            ollama: OllamaSection::default(),
            timeouts: LlmTimeoutsSection::default(),
            reserved_tokens: 500,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSection {
    pub model: String,
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            model: crate::llm::openai::OPENAI_DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroqSection {
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for GroqSection {
    fn default() -> Self {
        Self {
            model: crate::llm::GROQ_DEFAULT_MODEL.to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaSection {
    pub base_url: String,
    pub model: String,
    pub timeout_ladder_secs: Vec<u64>,
    /// 超过该字符数的 prompt 会被压缩
    pub prompt_char_limit: usize,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| crate::llm::ollama::OLLAMA_DEFAULT_URL.to_string()),
            model: crate::llm::OLLAMA_DEFAULT_MODEL.to_string(),
            timeout_ladder_secs: vec![10, 20, 30],
            prompt_char_limit: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub probe: u64,
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            probe: 5,
            request: 30,
        }
    }
}

/// [safety] 段：审批记忆策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    pub remember_decisions: bool,
    pub confidence_threshold: f64,
    pub decision_window_days: i64,
    pub initial_confidence: f64,
    pub confidence_step: f64,
    pub auto_approve_safe: bool,
}

impl Default for SafetySection {
    fn default() -> Self {
        let p = SafetyPolicy::default();
        Self {
            remember_decisions: p.remember_decisions,
            confidence_threshold: p.confidence_threshold,
            decision_window_days: p.window_days,
            initial_confidence: p.initial_confidence,
            confidence_step: p.confidence_step,
            auto_approve_safe: p.auto_approve_safe,
        }
    }
}

impl SafetySection {
    pub fn policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            remember_decisions: self.remember_decisions,
            confidence_threshold: self.confidence_threshold.clamp(0.0, 1.0),
            window_days: self.decision_window_days.max(0),
            initial_confidence: self.initial_confidence.clamp(0.0, 1.0),
            confidence_step: self.confidence_step,
            auto_approve_safe: self.auto_approve_safe,
        }
    }
}

/// [learning] 段：反馈步长、auto_approve 阈值、推荐下限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LearningSection {
    pub feedback_step: f64,
    pub auto_approve_threshold: f64,
    pub recommendation_floor: f64,
    /// 破坏性操作后是否询问 good/bad
    pub solicit_feedback: bool,
}

impl Default for LearningSection {
    fn default() -> Self {
        let p = LearningPolicy::default();
        Self {
            feedback_step: p.feedback_step,
            auto_approve_threshold: p.auto_approve_threshold,
            recommendation_floor: p.recommendation_floor,
            solicit_feedback: true,
        }
    }
}

impl LearningSection {
    pub fn policy(&self) -> LearningPolicy {
        LearningPolicy {
            feedback_step: self.feedback_step,
            auto_approve_threshold: self.auto_approve_threshold,
            recommendation_floor: self.recommendation_floor,
        }
    }
}

/// [tools] 段：工具超时、Shell 禁用模式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：命令中出现即拒绝执行的片段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub forbidden_patterns: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            forbidden_patterns: DEFAULT_FORBIDDEN.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEECODE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEECODE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEECODE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
