//! beecode - 本地项目编程助手智能体
//!
//! 模块划分：
//! - **agent**: 感知 → 推理 → 执行 → 学习 循环、多步请求、特殊命令
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复建议、版本库状态快照
//! - **intent**: 规则意图匹配（推理后端的确定性兜底）
//! - **learning**: 交互学习、洞察挖掘、工具推荐、反馈
//! - **llm**: 推理后端抽象、OpenAI / Groq / Ollama、token 预算、provider 级联
//! - **memory**: 会话级工作记忆与跨会话持久记忆（SQLite）
//! - **observability**: tracing 初始化
//! - **safety**: 破坏性操作分级、预览、审批与决策记忆
//! - **tools**: 工具契约、注册表、参数校验、执行器与内置工具
//! - **ui**: 展示层契约与终端 / 脚本实现

pub mod agent;
pub mod config;
pub mod core;
pub mod intent;
pub mod learning;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod safety;
pub mod tools;
pub mod ui;

pub use agent::{create_agent, Agent, AgentBuilder, AgentSettings};
