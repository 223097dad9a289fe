//! 行级 unified diff，用于覆盖已有文件前的预览

use similar::{ChangeTag, TextDiff};

const CONTEXT: usize = 3;

/// 生成 unified diff；内容相同返回空串
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT)
        .header(old_label, new_label)
        .to_string()
}

/// (删除行数, 新增行数)
pub fn change_counts(old: &str, new: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(old, new);
    let mut removed = 0;
    let mut added = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => removed += 1,
            ChangeTag::Insert => added += 1,
            ChangeTag::Equal => {}
        }
    }
    (removed, added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_empty() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n", "Current", "New"), "");
        assert_eq!(change_counts("a\nb\n", "a\nb\n"), (0, 0));
    }

    #[test]
    fn test_single_line_change() {
        let old = "one\ntwo\nthree\n";
        let new = "one\n2\nthree\n";
        let d = unified_diff(old, new, "Current", "New");
        assert!(d.starts_with("--- Current\n+++ New\n"));
        assert!(d.contains("@@ -1,3 +1,3 @@"));
        assert!(d.contains(" one\n-two\n+2\n three\n"));
    }

    #[test]
    fn test_distant_changes_make_two_hunks() {
        let old: String = (1..=20).map(|i| format!("l{i}\n")).collect();
        let new = old.replace("l2\n", "x2\n").replace("l18\n", "x18\n");
        let d = unified_diff(&old, &new, "Current", "New");
        assert_eq!(d.matches("@@ -").count(), 2);
        assert!(d.contains("-l2\n+x2\n"));
        assert!(d.contains("-l18\n+x18\n"));
    }

    #[test]
    fn test_large_file_keeps_minimal_hunk() {
        let old: String = (1..=2100).map(|i| format!("line {i}\n")).collect();
        let new = old.replace("line 1000\n", "line one thousand\n");
        assert_eq!(change_counts(&old, &new), (1, 1));

        let d = unified_diff(&old, &new, "Current", "New");
        let removed = d.lines().filter(|l| l.starts_with('-') && !l.starts_with("---")).count();
        assert_eq!(removed, 1);
        assert_eq!(d.matches("@@ -").count(), 1);
        assert!(d.contains("-line 1000\n+line one thousand\n"));
    }

    #[test]
    fn test_append_to_empty() {
        let d = unified_diff("", "hello\n", "Current", "New");
        assert!(d.contains("@@ -0,0 "));
        assert!(d.contains("+hello"));
    }
}
