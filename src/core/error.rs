//! 错误类型
//!
//! - AgentError：循环内与启动期错误（启动期仅工具注册表/工作记忆构建失败为致命）
//! - LlmError：推理后端单次尝试失败，由级联在本地恢复，不向用户抛出
//! - StoreError：持久化失败，调用方记录日志后降级为默认值

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// 推理后端（单个 provider）错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 持久化存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,
}
