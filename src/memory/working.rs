//! 工作记忆：按会话隔离的进程内缓存
//!
//! 保存交互日志、文件内容缓存（含访问计数）、最近一次版本库状态、会话级偏好，
//! 以及错误/成功模式计数；会话数超过上限时淘汰开始时间最早的会话。不保证重启后保留。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::VcsStatus;
use crate::memory::Interaction;

/// 缓存的文件内容
#[derive(Debug, Clone, Serialize)]
pub struct CachedFile {
    pub content: String,
    pub size: usize,
    pub cached_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

/// 单个会话的状态
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub interactions: Vec<Interaction>,
    pub file_contents: HashMap<String, CachedFile>,
    pub git_status: Option<VcsStatus>,
    pub current_directory: Option<String>,
    /// 失败交互的错误文本
    pub error_history: Vec<String>,
    /// 成功模式（关键词签名 -> 次数）
    pub success_patterns: HashMap<String, u32>,
    pub user_preferences: Map<String, Value>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            start_time: Utc::now(),
            end_time: None,
            interactions: Vec::new(),
            file_contents: HashMap::new(),
            git_status: None,
            current_directory: None,
            error_history: Vec::new(),
            success_patterns: HashMap::new(),
            user_preferences: Map::new(),
        }
    }

    fn summary(&self) -> SessionSummary {
        let end = self.end_time.unwrap_or_else(Utc::now);
        let total = self.interactions.len();
        let successful = self.interactions.iter().filter(|i| i.success).count();
        let unique_errors: HashSet<&str> = self.error_history.iter().map(String::as_str).collect();
        SessionSummary {
            session_id: self.id.clone(),
            duration_secs: (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0,
            total_interactions: total,
            successful_interactions: successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            unique_errors: unique_errors.len(),
            files_accessed: self.file_contents.len(),
        }
    }
}

/// 会话结束（或查询）时的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub duration_secs: f64,
    pub total_interactions: usize,
    pub successful_interactions: usize,
    /// 0.0 ~ 1.0
    pub success_rate: f64,
    pub unique_errors: usize,
    pub files_accessed: usize,
}

/// 供 prompt 使用的上下文摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub current_directory: Option<String>,
    pub files_in_memory: Vec<String>,
    /// 最近 3 次动作的工具名
    pub recent_actions: Vec<String>,
    pub git_status: Option<VcsStatus>,
    pub session_duration_secs: f64,
}

/// 工作记忆：多个会话，至多一个活动会话
#[derive(Debug)]
pub struct WorkingMemory {
    sessions: HashMap<String, Session>,
    current: Option<String>,
    max_sessions: usize,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(10)
    }
}

impl WorkingMemory {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            current: None,
            max_sessions: max_sessions.max(1),
        }
    }

    /// 开始新会话并设为当前会话；返回会话 id
    pub fn start_session(&mut self, session_id: Option<String>) -> String {
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.sessions.insert(id.clone(), Session::new(id.clone()));
        self.current = Some(id.clone());
        self.evict();
        tracing::debug!(session = %id, "working memory session started");
        id
    }

    /// 结束当前会话：返回摘要，会话数据保留到被淘汰
    pub fn end_session(&mut self) -> Option<SessionSummary> {
        let id = self.current.take()?;
        let session = self.sessions.get_mut(&id)?;
        session.end_time = Some(Utc::now());
        Some(session.summary())
    }

    fn evict(&mut self) {
        while self.sessions.len() > self.max_sessions {
            let oldest = self
                .sessions
                .values()
                .filter(|s| Some(&s.id) != self.current.as_ref())
                .min_by_key(|s| s.start_time)
                .map(|s| s.id.clone());
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                }
                None => break,
            }
        }
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    fn current_mut(&mut self) -> Option<&mut Session> {
        let id = self.current.as_ref()?;
        self.sessions.get_mut(id)
    }

    fn current_ref(&self) -> Option<&Session> {
        let id = self.current.as_ref()?;
        self.sessions.get(id)
    }

    /// 追加交互，同时更新错误历史与成功模式
    ///
    /// 交互必须属于当前会话；没有活动会话或会话不符时丢弃并返回 false。
    pub fn add_interaction(&mut self, interaction: Interaction) -> bool {
        let Some(session) = self.current_mut() else {
            tracing::warn!("add_interaction without an active session");
            return false;
        };
        if session.id != interaction.session_id {
            tracing::warn!(
                current = %session.id,
                given = %interaction.session_id,
                "interaction belongs to another session, dropped"
            );
            return false;
        }
        if interaction.success {
            let pattern = format!(
                "{}:{}",
                interaction.action.tool_name,
                extract_pattern(&interaction.user_input)
            );
            *session.success_patterns.entry(pattern).or_insert(0) += 1;
        } else {
            session
                .error_history
                .push(interaction.result.error_text().to_string());
        }
        session.interactions.push(interaction);
        true
    }

    /// 最近 n 条交互（时间正序）
    pub fn recent_interactions(&self, n: usize) -> Vec<Interaction> {
        self.current_ref()
            .map(|s| {
                let start = s.interactions.len().saturating_sub(n);
                s.interactions[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn cache_file(&mut self, path: &str, content: &str, metadata: Map<String, Value>) {
        let Some(session) = self.current_mut() else {
            return;
        };
        let now = Utc::now();
        let access_count = session
            .file_contents
            .get(path)
            .map(|f| f.access_count)
            .unwrap_or(0);
        session.file_contents.insert(
            path.to_string(),
            CachedFile {
                content: content.to_string(),
                size: content.len(),
                cached_at: now,
                metadata,
                access_count,
                last_accessed: now,
            },
        );
    }

    /// 读取缓存文件并更新访问索引
    pub fn get_file(&mut self, path: &str) -> Option<String> {
        let file = self.current_mut()?.file_contents.get_mut(path)?;
        file.access_count += 1;
        file.last_accessed = Utc::now();
        Some(file.content.clone())
    }

    pub fn set_git_status(&mut self, status: VcsStatus) {
        if let Some(s) = self.current_mut() {
            s.git_status = Some(status);
        }
    }

    pub fn set_current_directory(&mut self, dir: impl Into<String>) {
        if let Some(s) = self.current_mut() {
            s.current_directory = Some(dir.into());
        }
    }

    pub fn get_preference(&self, key: &str) -> Option<&Value> {
        self.current_ref()?.user_preferences.get(key)
    }

    pub fn set_preference(&mut self, key: &str, value: Value) {
        if let Some(s) = self.current_mut() {
            s.user_preferences.insert(key.to_string(), value);
        }
    }

    pub fn preferences(&self) -> Map<String, Value> {
        self.current_ref()
            .map(|s| s.user_preferences.clone())
            .unwrap_or_default()
    }

    /// 布尔偏好（缺省时返回 default）
    pub fn bool_preference(&self, key: &str, default: bool) -> bool {
        self.get_preference(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn context_summary(&self) -> ContextSummary {
        let Some(s) = self.current_ref() else {
            return ContextSummary::default();
        };
        let mut files: Vec<String> = s.file_contents.keys().cloned().collect();
        files.sort();
        let start = s.interactions.len().saturating_sub(3);
        ContextSummary {
            current_directory: s.current_directory.clone(),
            files_in_memory: files,
            recent_actions: s.interactions[start..]
                .iter()
                .map(|i| i.action.tool_name.clone())
                .collect(),
            git_status: s.git_status.clone(),
            session_duration_secs: (Utc::now() - s.start_time).num_milliseconds().max(0) as f64
                / 1000.0,
        }
    }

    pub fn session_summary(&self) -> Option<SessionSummary> {
        self.current_ref().map(Session::summary)
    }
}

/// 从输入中取至多 5 个重要词（长度 > 3，去掉停用词）
pub fn extract_pattern(input: &str) -> String {
    const STOP: &[&str] = &["what", "that", "this", "with", "from", "have", "were", "will"];
    input
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 3 && !STOP.contains(&w.as_str()))
        .take(5)
        .collect::<Vec<_>>()
        .join("_")
}
