//! 多步请求：按固定分隔短语拆分，每一步独立跑完整循环

use crate::agent::{Agent, StepReport};
use crate::learning::COMMUNICATION_STYLE_KEY;
use crate::ui::{render_result, RenderOptions, Verbosity};

/// 按优先级尝试，第一个出现在输入中的分隔短语生效
pub const STEP_DELIMITERS: &[&str] = &[" and then ", " after that ", " followed by ", " then ", " next "];

const CONTINUE_PROMPT: &str = "Continue with remaining steps? (y/n): ";

/// 拆分为有序子指令；没有分隔短语时整条输入（去首尾空白）为唯一一步
///
/// 匹配不区分 ASCII 大小写，子指令保留原文大小写。
pub fn split_steps(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let Some(delim) = STEP_DELIMITERS.iter().find(|d| lower.contains(*d)) else {
        return vec![trimmed.to_string()];
    };

    let mut steps = Vec::new();
    let mut start = 0;
    for (idx, _) in lower.match_indices(delim) {
        steps.push(&trimmed[start..idx]);
        start = idx + delim.len();
    }
    steps.push(&trimmed[start..]);

    let steps: Vec<String> = steps
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if steps.is_empty() {
        vec![trimmed.to_string()]
    } else {
        steps
    }
}

impl Agent {
    /// 处理一条用户请求（可能含多步）；某步失败后询问是否继续
    pub async fn handle_request(&mut self, input: &str) -> Vec<StepReport> {
        let steps = split_steps(input);
        let total = steps.len();
        if total > 1 {
            tracing::info!(steps = total, "multi-step request");
        }
        let mut reports = Vec::with_capacity(total);
        for (i, step) in steps.iter().enumerate() {
            if total > 1 {
                self.ui.display(step, Some(&format!("Step {}/{}", i + 1, total)));
            }
            let report = self.process_input(step).await;
            let options = RenderOptions {
                verbosity: Verbosity::resolve(
                    self.working.get_preference("verbosity"),
                    self.working.get_preference(COMMUNICATION_STYLE_KEY),
                ),
                show_diffs: self.working.bool_preference("show_diffs", true),
            };
            render_result(self.ui.as_ref(), &report.result, &options);
            let failed = !report.result.success;
            reports.push(report);
            if failed && i + 1 < total && !self.ui.confirm(CONTINUE_PROMPT) {
                self.ui.display(&format!("Skipped {} remaining step(s)", total - i - 1), None);
                break;
            }
        }
        reports
    }
}
