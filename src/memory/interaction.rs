//! 交互记录：一次「输入 -> 动作 -> 结果」的不可变快照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::{Action, ToolResult};

/// 单次交互；属于产生它的会话，同时写入持久层用于跨会话学习
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub session_id: String,
    pub user_input: String,
    pub action: Action,
    pub result: ToolResult,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// 交互发生时的项目路径
    #[serde(default)]
    pub project_path: Option<String>,
}

impl Interaction {
    pub fn new(
        session_id: impl Into<String>,
        user_input: impl Into<String>,
        action: Action,
        result: ToolResult,
    ) -> Self {
        let success = result.success;
        Self {
            session_id: session_id.into(),
            user_input: user_input.into(),
            action,
            result,
            timestamp: Utc::now(),
            success,
            project_path: None,
        }
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }
}
