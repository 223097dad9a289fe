//! 工具结果渲染：message 之后依次展示 content / items / stdout / diff / suggestions
//!
//! 展示多少由 verbosity 决定：low 只给结论，normal 截断长内容，high 全量输出。

use serde_json::Value;

use crate::tools::ToolResult;
use crate::ui::Presenter;

/// normal 档下 content / stdout 最多展示的行数
const NORMAL_MAX_LINES: usize = 40;
/// normal 档下 items 最多展示的条数
const NORMAL_MAX_ITEMS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Low,
    #[default]
    Normal,
    High,
}

impl Verbosity {
    /// verbosity 偏好优先；为 normal 时由 communication_style 决定
    pub fn resolve(verbosity: Option<&Value>, style: Option<&Value>) -> Self {
        match Self::parse(verbosity) {
            Verbosity::Normal => Self::parse(style),
            v => v,
        }
    }

    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str).map(str::to_lowercase).as_deref() {
            Some("low" | "minimal" | "quiet" | "concise") => Verbosity::Low,
            Some("high" | "verbose" | "detailed") => Verbosity::High,
            _ => Verbosity::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub verbosity: Verbosity,
    pub show_diffs: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            show_diffs: true,
        }
    }
}

fn clip_lines(text: &str, max: usize) -> String {
    let total = text.lines().count();
    if total <= max {
        return text.to_string();
    }
    let head: Vec<&str> = text.lines().take(max).collect();
    format!(
        "{}\n... ({} more lines, 'set preference verbosity high' shows everything)",
        head.join("\n"),
        total - max
    )
}

pub fn render_result(ui: &dyn Presenter, result: &ToolResult, opts: &RenderOptions) {
    if result.success {
        ui.display(&result.message, None);
    } else {
        let detail = match &result.error {
            Some(e) if e != &result.message => format!("{} ({})", result.message, e),
            _ => result.message.clone(),
        };
        ui.display_error(&detail);
    }
    let full = opts.verbosity == Verbosity::High;
    if opts.verbosity != Verbosity::Low {
        if let Some(content) = &result.content {
            let shown = if full {
                content.clone()
            } else {
                clip_lines(content, NORMAL_MAX_LINES)
            };
            ui.display(&shown, Some("Content"));
        }
        if let Some(items) = &result.items {
            if !items.is_empty() {
                let mut lines: Vec<String> = items.clone();
                if !full && lines.len() > NORMAL_MAX_ITEMS {
                    let rest = lines.len() - NORMAL_MAX_ITEMS;
                    lines.truncate(NORMAL_MAX_ITEMS);
                    lines.push(format!("... ({rest} more)"));
                }
                ui.display(&lines.join("\n"), Some("Items"));
            }
        }
        if let Some(stdout) = &result.stdout {
            let stdout = stdout.trim_end();
            if !stdout.trim().is_empty() {
                let shown = if full {
                    stdout.to_string()
                } else {
                    clip_lines(stdout, NORMAL_MAX_LINES)
                };
                ui.display(&shown, Some("Output"));
            }
        }
    }
    if opts.show_diffs {
        if let Some(diff) = &result.diff {
            ui.display(diff, Some("Diff"));
        }
    }
    if !result.suggestions.is_empty() {
        let lines: Vec<String> = result.suggestions.iter().map(|s| format!("- {s}")).collect();
        ui.display(&lines.join("\n"), Some("Suggestions"));
    }
}
