//! 展示层契约：display / display_error / display_table / prompt
//!
//! 核心循环只依赖 Presenter trait；TerminalUi 为行式终端实现，ScriptedUi 按预置答案应答并记录输出（无头运行与测试）。

pub mod render;
pub mod scripted;
pub mod terminal;

pub use render::{render_result, RenderOptions, Verbosity};
pub use scripted::ScriptedUi;
pub use terminal::TerminalUi;

/// 展示层接口（同步，阻塞直到用户作答）
pub trait Presenter: Send + Sync {
    /// 输出一段文本，可带标题
    fn display(&self, text: &str, title: Option<&str>);

    fn display_error(&self, text: &str);

    /// 两列表格
    fn display_table(&self, title: &str, rows: &[(String, String)]);

    /// 提示并读取一行输入（已去除首尾空白）；输入结束时返回空串
    fn prompt(&self, text: &str) -> String;

    /// 读取下一条用户指令；输入流结束时返回 None
    fn read_input(&self, text: &str) -> Option<String> {
        Some(self.prompt(text))
    }

    /// 是否确认（y / yes）
    fn confirm(&self, text: &str) -> bool {
        matches!(self.prompt(text).to_lowercase().as_str(), "y" | "yes")
    }
}
