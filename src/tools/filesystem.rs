//! 文件系统工具
//!
//! SafeFs 绑定项目根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸）；
//! read_file / write_file / delete_file / list_directory / get_structure 基于 SafeFs 实现。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::{str_param, u64_param, ParameterSchema, Tool, ToolParams, ToolResult};

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 词法解析路径（目标可以不存在），拒绝逃出根目录
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let trimmed = path.trim();
        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root_dir.join(candidate)
        };
        let mut normalized = PathBuf::new();
        for comp in joined.components() {
            match comp {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(AgentError::PathEscape(trimmed.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }
        if normalized.starts_with(&self.root_dir) {
            Ok(normalized)
        } else {
            Err(AgentError::PathEscape(trimmed.to_string())) // 如 ../../etc/passwd
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(AgentError::ToolExecutionFailed(format!("File not found: {path}")));
        }
        if !resolved.is_file() {
            return Err(AgentError::ToolExecutionFailed(format!("Not a file: {path}")));
        }
        let bytes = std::fs::read(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<PathBuf, AgentError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Create dir failed: {e}")))?;
        }
        std::fs::write(&resolved, content)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {e}")))?;
        Ok(resolved)
    }

    pub fn delete_file(&self, path: &str) -> Result<(), AgentError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(AgentError::ToolExecutionFailed(format!("File not found: {path}")));
        }
        std::fs::remove_file(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Delete failed: {e}")))
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = self.resolve(if path.is_empty() { "." } else { path })?;
        if !base.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "Directory not found: {path}"
            )));
        }
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {e}")))?
        {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{name}{ty}"));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// 目录树（缩进表示层级），跳过隐藏项与 target/node_modules
    pub fn structure(&self, path: &str, max_depth: usize) -> Result<Vec<String>, AgentError> {
        let base = self.resolve(if path.is_empty() { "." } else { path })?;
        if !base.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "Directory not found: {path}"
            )));
        }
        let walker = WalkDir::new(&base)
            .min_depth(1)
            .max_depth(max_depth.max(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && name != "target" && name != "node_modules"
            });
        let mut lines = Vec::new();
        for entry in walker.filter_map(Result::ok) {
            let indent = "  ".repeat(entry.depth().saturating_sub(1));
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            lines.push(format!(
                "{indent}{}{suffix}",
                entry.file_name().to_string_lossy()
            ));
        }
        Ok(lines)
    }
}

/// read_file：读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("file_path")
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let path = str_param(params, "file_path")?;
        tracing::debug!(path = %path, "read_file execute");
        match self.fs.read_file(path) {
            Ok(content) => Ok(ToolResult::ok(format!("Read file: {path}"))
                .with_data("size", json!(content.len()))
                .with_content(content)),
            Err(e) => Ok(ToolResult::failure(
                e.to_string(),
                format!("Failed to read file: {path}"),
            )),
        }
    }
}

/// write_file：写入文件（自动创建父目录）
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("file_path")
            .with_required("content")
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let path = str_param(params, "file_path")?;
        let content = str_param(params, "content")?;
        self.fs.write_file(path, content).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(format!("Wrote {} bytes to {path}", content.len())))
    }
}

/// delete_file：删除单个文件
pub struct DeleteFileTool {
    fs: SafeFs,
}

impl DeleteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("file_path")
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let path = str_param(params, "file_path")?;
        self.fs.delete_file(path).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(format!("Deleted {path}")))
    }
}

/// list_directory：列出目录
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a directory"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().with_optional("path", json!("."))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let path = str_param(params, "path").unwrap_or(".");
        let items = self.fs.list_dir(path).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(format!("{} entries in {path}", items.len())).with_items(items))
    }
}

/// get_structure：项目目录树
pub struct GetStructureTool {
    fs: SafeFs,
}

impl GetStructureTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for GetStructureTool {
    fn name(&self) -> &str {
        "get_structure"
    }

    fn description(&self) -> &str {
        "Show the project directory tree up to max_depth"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_optional("path", json!("."))
            .with_optional("max_depth", json!(3))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, String> {
        let path = str_param(params, "path").unwrap_or(".");
        let depth = u64_param(params, "max_depth", 3) as usize;
        let items = self.fs.structure(path, depth).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(format!("Structure of {path} (depth {depth})")).with_items(items))
    }
}
