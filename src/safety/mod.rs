//! 安全框架：破坏性操作分级、预览与审批门
//!
//! - is_destructive / is_high_risk / get_risk_level 为纯查表
//! - request_approval：先查记忆中的决策（7 天窗口内、置信度达阈值即复用，每次复用置信度上调），
//!   再交给注册的审批回调，最后才交互式确认（critical 级需输入 CONFIRM）
//! - 审批历史只追加，供 approval_statistics 统计

pub mod diff;
pub mod preview;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::VcsStatus;
use crate::memory::generate_context_hash;
use crate::tools::{SafeFs, ToolParams};
use crate::ui::Presenter;

pub use preview::{build_preview, command_risk, Preview, RiskLevel};

pub const DESTRUCTIVE_OPERATIONS: &[&str] = &[
    "write_file",
    "delete_file",
    "git_commit",
    "git_merge",
    "run_command",
    "build_project",
];

pub const HIGH_RISK_OPERATIONS: &[&str] = &["delete_file", "git_merge", "run_command"];

const CONFIRM_PHRASE: &str = "CONFIRM";

/// 审批回调：(操作, 参数, 预览) -> 是否批准
pub type ApprovalCallback = Arc<dyn Fn(&str, &ToolParams, &Preview) -> bool + Send + Sync>;

/// 决策记忆策略；增量与阈值可调
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyPolicy {
    pub remember_decisions: bool,
    pub confidence_threshold: f64,
    pub window_days: i64,
    pub initial_confidence: f64,
    pub confidence_step: f64,
    /// 低风险操作免审批
    pub auto_approve_safe: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            remember_decisions: true,
            confidence_threshold: 0.8,
            window_days: 7,
            initial_confidence: 0.5,
            confidence_step: 0.1,
            auto_approve_safe: false,
        }
    }
}

/// 决策来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSource {
    AutoSafe,
    Remembered,
    Callback,
    Prompt,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecord {
    pub operation: String,
    pub fingerprint: String,
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub source: ApprovalSource,
}

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub approved: bool,
    pub source: ApprovalSource,
    pub preview: Preview,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecisionCounts {
    pub total: usize,
    pub approved: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApprovalStatistics {
    pub total: usize,
    pub approved: usize,
    pub approval_rate: f64,
    pub by_operation: BTreeMap<String, DecisionCounts>,
    pub by_risk_level: BTreeMap<String, DecisionCounts>,
}

pub struct SafetyFramework {
    fs: SafeFs,
    policy: SafetyPolicy,
    callbacks: HashMap<String, ApprovalCallback>,
    history: Vec<ApprovalRecord>,
}

fn nudge(confidence: f64, step: f64) -> f64 {
    // 保留 6 位，避免 0.7 + 0.1 < 0.8 这类浮点误差
    (((confidence + step).clamp(0.0, 1.0)) * 1e6).round() / 1e6
}

pub fn is_destructive(operation: &str) -> bool {
    DESTRUCTIVE_OPERATIONS.contains(&operation)
}

pub fn is_high_risk(operation: &str) -> bool {
    HIGH_RISK_OPERATIONS.contains(&operation)
}

/// 静态分级：高风险 High，其余破坏性 Medium，非破坏性 Low
pub fn get_risk_level(operation: &str) -> RiskLevel {
    if is_high_risk(operation) {
        RiskLevel::High
    } else if is_destructive(operation) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// 只保留决定“是否同一操作”的参数
fn fingerprint(operation: &str, params: &ToolParams) -> String {
    let pick = |key: &str| params.get(key).cloned().unwrap_or(Value::Null);
    let simplified = match operation {
        "write_file" | "delete_file" => json!({ "file_path": pick("file_path") }),
        "run_command" => json!({ "command": pick("command") }),
        "git_commit" => json!({ "message": pick("message") }),
        "git_merge" => json!({ "branch": pick("branch") }),
        _ => Value::Object(params.clone()),
    };
    generate_context_hash(&json!({ "operation": operation, "params": simplified }))
}

impl SafetyFramework {
    pub fn new(project_root: impl AsRef<Path>, policy: SafetyPolicy) -> Self {
        Self {
            fs: SafeFs::new(project_root),
            policy,
            callbacks: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    pub fn is_destructive(&self, operation: &str) -> bool {
        is_destructive(operation)
    }

    pub fn is_high_risk(&self, operation: &str) -> bool {
        is_high_risk(operation)
    }

    pub fn get_risk_level(&self, operation: &str) -> RiskLevel {
        get_risk_level(operation)
    }

    pub fn register_approval_callback(&mut self, operation: &str, callback: ApprovalCallback) {
        self.callbacks.insert(operation.to_string(), callback);
    }

    pub fn generate_preview(
        &self,
        operation: &str,
        params: &ToolParams,
        vcs: Option<&VcsStatus>,
    ) -> Preview {
        build_preview(&self.fs, operation, params, get_risk_level(operation), vcs)
    }

    pub fn set_confidence_threshold(&mut self, threshold: f64) {
        self.policy.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn set_remember_decisions(&mut self, enabled: bool) {
        self.policy.remember_decisions = enabled;
    }

    pub fn set_auto_approve_safe(&mut self, enabled: bool) {
        self.policy.auto_approve_safe = enabled;
    }

    pub fn history(&self) -> &[ApprovalRecord] {
        &self.history
    }

    /// 窗口内同指纹的最近一次决策
    fn latest_decision(&self, fp: &str) -> Option<&ApprovalRecord> {
        let cutoff = Utc::now() - Duration::days(self.policy.window_days);
        self.history
            .iter()
            .rev()
            .find(|r| r.fingerprint == fp && r.timestamp >= cutoff)
    }

    /// 审批入口；拒绝是正常结果，不是错误
    pub fn request_approval(
        &mut self,
        operation: &str,
        params: &ToolParams,
        vcs: Option<&VcsStatus>,
        ui: &dyn Presenter,
    ) -> ApprovalOutcome {
        let preview = self.generate_preview(operation, params, vcs);
        let risk = preview.risk_level;
        let fp = fingerprint(operation, params);

        if self.policy.auto_approve_safe && risk == RiskLevel::Low {
            tracing::debug!(operation, "auto-approved low-risk operation");
            self.append(operation, &fp, true, 1.0, risk, ApprovalSource::AutoSafe);
            return ApprovalOutcome {
                approved: true,
                source: ApprovalSource::AutoSafe,
                preview,
            };
        }

        let prior = self
            .latest_decision(&fp)
            .map(|r| (r.approved, r.confidence));

        if self.policy.remember_decisions && risk != RiskLevel::Critical {
            if let Some((approved, confidence)) = prior {
                let nudged = nudge(confidence, self.policy.confidence_step);
                if nudged >= self.policy.confidence_threshold {
                    tracing::info!(operation, approved, confidence = nudged, "reusing remembered decision");
                    self.append(operation, &fp, approved, nudged, risk, ApprovalSource::Remembered);
                    return ApprovalOutcome {
                        approved,
                        source: ApprovalSource::Remembered,
                        preview,
                    };
                }
            }
        }

        let (approved, source) = match self.callbacks.get(operation) {
            Some(cb) => (cb(operation, params, &preview), ApprovalSource::Callback),
            None => (prompt_user(ui, &preview), ApprovalSource::Prompt),
        };

        let confidence = match prior {
            Some((prev, c)) if prev == approved => nudge(c, self.policy.confidence_step),
            _ => self.policy.initial_confidence,
        };
        self.append(operation, &fp, approved, confidence, risk, source);
        tracing::info!(operation, approved, risk = %risk, "approval decision");
        ApprovalOutcome {
            approved,
            source,
            preview,
        }
    }

    fn append(
        &mut self,
        operation: &str,
        fp: &str,
        approved: bool,
        confidence: f64,
        risk_level: RiskLevel,
        source: ApprovalSource,
    ) {
        self.history.push(ApprovalRecord {
            operation: operation.to_string(),
            fingerprint: fp.to_string(),
            approved,
            timestamp: Utc::now(),
            confidence,
            risk_level,
            source,
        });
    }

    pub fn approval_statistics(&self) -> ApprovalStatistics {
        let mut stats = ApprovalStatistics::default();
        for r in &self.history {
            stats.total += 1;
            let op = stats.by_operation.entry(r.operation.clone()).or_default();
            op.total += 1;
            let tier = stats
                .by_risk_level
                .entry(r.risk_level.as_str().to_string())
                .or_default();
            tier.total += 1;
            if r.approved {
                stats.approved += 1;
                op.approved += 1;
                tier.approved += 1;
            }
        }
        if stats.total > 0 {
            stats.approval_rate = stats.approved as f64 / stats.total as f64;
        }
        stats
    }
}

fn prompt_user(ui: &dyn Presenter, preview: &Preview) -> bool {
    ui.display(&preview.render(), Some("Approval required"));
    if let Some(diff) = &preview.diff {
        ui.display(diff, Some("Diff"));
    }
    if preview.risk_level == RiskLevel::Critical {
        ui.prompt(&format!(
            "This operation is CRITICAL. Type {CONFIRM_PHRASE} to proceed: "
        )) == CONFIRM_PHRASE
    } else {
        ui.confirm(&format!("Approve {}? (y/n): ", preview.operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::ScriptedUi;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(v: Value) -> ToolParams {
        v.as_object().cloned().unwrap_or_default()
    }

    fn counting_callback(counter: Arc<AtomicUsize>, answer: bool) -> ApprovalCallback {
        Arc::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            answer
        })
    }

    #[test]
    fn test_classification() {
        assert!(is_destructive("write_file"));
        assert!(!is_destructive("read_file"));
        assert!(is_high_risk("run_command"));
        assert!(!is_high_risk("git_commit"));
        assert_eq!(get_risk_level("read_file"), RiskLevel::Low);
        assert_eq!(get_risk_level("git_commit"), RiskLevel::Medium);
        assert_eq!(get_risk_level("delete_file"), RiskLevel::High);
    }

    #[test]
    fn test_remembered_decision_skips_callback() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        safety.set_confidence_threshold(0.5);
        let calls = Arc::new(AtomicUsize::new(0));
        safety.register_approval_callback("write_file", counting_callback(calls.clone(), true));
        let ui = ScriptedUi::default();
        let p = params(json!({"file_path": "a.txt", "content": "x"}));

        let first = safety.request_approval("write_file", &p, None, &ui);
        assert!(first.approved);
        assert_eq!(first.source, ApprovalSource::Callback);

        let second = safety.request_approval("write_file", &p, None, &ui);
        assert!(second.approved);
        assert_eq!(second.source, ApprovalSource::Remembered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(safety.history()[1].confidence > safety.history()[0].confidence);
    }

    #[test]
    fn test_confidence_ramps_to_default_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        safety.register_approval_callback("git_commit", counting_callback(calls.clone(), true));
        let ui = ScriptedUi::default();
        let p = params(json!({"message": "wip"}));
        // 0.5 -> 0.6 -> 0.7 需要询问，第 4 次上调到 0.8 后复用
        for _ in 0..4 {
            safety.request_approval("git_commit", &p, None, &ui);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(safety.history()[3].source, ApprovalSource::Remembered);
    }

    #[test]
    fn test_different_fingerprint_asks_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        safety.set_confidence_threshold(0.0);
        let calls = Arc::new(AtomicUsize::new(0));
        safety.register_approval_callback("delete_file", counting_callback(calls.clone(), false));
        let ui = ScriptedUi::default();
        safety.request_approval("delete_file", &params(json!({"file_path": "a"})), None, &ui);
        let out = safety.request_approval("delete_file", &params(json!({"file_path": "b"})), None, &ui);
        assert!(!out.approved);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_critical_command_requires_confirm_phrase() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        let p = params(json!({"command": "rm -r target"}));

        let ui = ScriptedUi::new(["y"]);
        let out = safety.request_approval("run_command", &p, None, &ui);
        assert_eq!(out.preview.risk_level, RiskLevel::Critical);
        assert!(!out.approved);

        let ui = ScriptedUi::new(["CONFIRM"]);
        assert!(safety.request_approval("run_command", &p, None, &ui).approved);
    }

    #[test]
    fn test_critical_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        safety.set_confidence_threshold(0.0);
        let p = params(json!({"command": "mkfs /dev/sda"}));
        let ui = ScriptedUi::new(["CONFIRM", "no"]);
        assert!(safety.request_approval("run_command", &p, None, &ui).approved);
        let second = safety.request_approval("run_command", &p, None, &ui);
        assert_eq!(second.source, ApprovalSource::Prompt);
        assert!(!second.approved);
    }

    #[test]
    fn test_auto_approve_safe_for_low_risk() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        safety.set_auto_approve_safe(true);
        let ui = ScriptedUi::default();
        let out = safety.request_approval("run_command", &params(json!({"command": "ls"})), None, &ui);
        assert!(out.approved);
        assert_eq!(out.source, ApprovalSource::AutoSafe);
        assert!(ui.prompts().is_empty());
    }

    #[test]
    fn test_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let mut safety = SafetyFramework::new(dir.path(), SafetyPolicy::default());
        let ui = ScriptedUi::new(["y", "n"]);
        safety.request_approval("write_file", &params(json!({"file_path": "a", "content": ""})), None, &ui);
        safety.request_approval("delete_file", &params(json!({"file_path": "a"})), None, &ui);
        let stats = safety.approval_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.approved, 1);
        assert!((stats.approval_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.by_operation["delete_file"].approved, 0);
        assert_eq!(stats.by_risk_level["medium"].total, 1);
        assert_eq!(stats.by_risk_level["high"].total, 1);
    }
}
