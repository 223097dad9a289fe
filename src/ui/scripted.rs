//! 预置答案的展示层：prompt 按顺序弹出答案（耗尽后返回空串），所有输出记录在内存中

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ui::Presenter;

#[derive(Debug, Default)]
pub struct ScriptedUi {
    answers: Mutex<VecDeque<String>>,
    output: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedUi {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn push_answer(&self, answer: impl Into<String>) {
        if let Ok(mut a) = self.answers.lock() {
            a.push_back(answer.into());
        }
    }

    /// 已输出的文本（含标题行与错误）
    pub fn output(&self) -> Vec<String> {
        self.output.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// 收到过的提示
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, line: String) {
        if let Ok(mut o) = self.output.lock() {
            o.push(line);
        }
    }
}

impl Presenter for ScriptedUi {
    fn display(&self, text: &str, title: Option<&str>) {
        match title {
            Some(t) => self.record(format!("[{t}] {text}")),
            None => self.record(text.to_string()),
        }
    }

    fn display_error(&self, text: &str) {
        self.record(format!("error: {text}"));
    }

    fn display_table(&self, title: &str, rows: &[(String, String)]) {
        self.record(format!("[{title}]"));
        for (k, v) in rows {
            self.record(format!("{k}: {v}"));
        }
    }

    fn prompt(&self, text: &str) -> String {
        self.read_input(text).unwrap_or_default()
    }

    /// 答案耗尽即视为输入结束
    fn read_input(&self, text: &str) -> Option<String> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(text.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .map(|a| a.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers_in_order_then_empty() {
        let ui = ScriptedUi::new(["y", "no"]);
        assert!(ui.confirm("ok? "));
        assert!(!ui.confirm("again? "));
        assert_eq!(ui.prompt("more? "), "");
        assert_eq!(ui.read_input("next> "), None);
        assert_eq!(ui.prompts().len(), 4);
    }
}
