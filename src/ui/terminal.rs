//! 行式终端实现：stdout 输出，stdin 读取

use std::io::{self, BufRead, Write};

use crate::ui::Presenter;

#[derive(Debug, Default)]
pub struct TerminalUi;

impl TerminalUi {
    pub fn new() -> Self {
        Self
    }
}

impl Presenter for TerminalUi {
    fn display(&self, text: &str, title: Option<&str>) {
        let mut out = io::stdout().lock();
        if let Some(t) = title {
            let _ = writeln!(out, "── {t} ──");
        }
        let _ = writeln!(out, "{text}");
    }

    fn display_error(&self, text: &str) {
        let _ = writeln!(io::stderr().lock(), "✗ {text}");
    }

    fn display_table(&self, title: &str, rows: &[(String, String)]) {
        let width = rows.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "── {title} ──");
        for (k, v) in rows {
            let _ = writeln!(out, "  {k:<width$}  {v}");
        }
    }

    fn prompt(&self, text: &str) -> String {
        self.read_input(text).unwrap_or_default()
    }

    fn read_input(&self, text: &str) -> Option<String> {
        {
            let mut out = io::stdout().lock();
            let _ = write!(out, "{text}");
            let _ = out.flush();
        }
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                None
            }
        }
    }
}
