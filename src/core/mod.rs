//! 核心层：错误类型、恢复建议、版本库状态快照

pub mod error;
pub mod recovery;
pub mod vcs;

pub use error::{AgentError, LlmError, StoreError};
pub use recovery::RecoveryEngine;
pub use vcs::VcsStatus;
