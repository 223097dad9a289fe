//! 工具层：Tool 契约、注册表与参数校验、执行器，以及内置的文件/Git/命令工具

pub mod action;
pub mod executor;
pub mod filesystem;
pub mod git;
pub mod registry;
pub mod schema;
pub mod shell;

use std::path::Path;

pub use action::Action;
pub use executor::ToolExecutor;
pub use filesystem::{
    DeleteFileTool, GetStructureTool, ListDirectoryTool, ReadFileTool, SafeFs, WriteFileTool,
};
pub use git::{GitCommitTool, GitDiffTool, GitStatusTool};
pub use registry::{
    bool_param, normalize_parameters, str_param, u64_param, validate_parameters,
    ParameterSchema, Tool, ToolParams, ToolRegistry, ToolResult,
};
pub use schema::decision_schema_json;
pub use shell::{RunCommandTool, DEFAULT_FORBIDDEN};

/// 以项目根目录构建内置工具注册表
pub fn builtin_registry(
    root: &Path,
    forbidden_commands: Vec<String>,
    command_timeout_secs: u64,
) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool::new(root));
    tools.register(WriteFileTool::new(root));
    tools.register(DeleteFileTool::new(root));
    tools.register(ListDirectoryTool::new(root));
    tools.register(GetStructureTool::new(root));
    tools.register(GitStatusTool::new(root));
    tools.register(GitDiffTool::new(root));
    tools.register(GitCommitTool::new(root));
    tools.register(RunCommandTool::new(root, forbidden_commands, command_timeout_secs));
    tools
}
