//! 持久记忆：跨会话的 SQLite 存储
//!
//! 六个集合：user_preferences / project_patterns / tool_effectiveness / interaction_history /
//! learning_insights / file_knowledge。所有读写都经过同一把互斥锁：
//! 内存库复用一个物理连接，磁盘库每次操作打开一个新连接。
//! 打开磁盘库时执行保留策略（30 天前的交互、90 天未用且使用少于 5 次的模式），失败只记日志。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::StoreError;
use crate::memory::Interaction;

const INTERACTION_RETENTION_DAYS: i64 = 30;
const PATTERN_RETENTION_DAYS: i64 = 90;
const PATTERN_MIN_USAGE: i64 = 5;
const UNFILTERED_INSIGHT_LIMIT: i64 = 50;

/// 洞察类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    ToolEffectiveness,
    UserPatterns,
    ProjectStructure,
    ErrorPatterns,
}

impl InsightType {
    pub const ALL: [InsightType; 4] = [
        InsightType::ToolEffectiveness,
        InsightType::UserPatterns,
        InsightType::ProjectStructure,
        InsightType::ErrorPatterns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::ToolEffectiveness => "tool_effectiveness",
            InsightType::UserPatterns => "user_patterns",
            InsightType::ProjectStructure => "project_structure",
            InsightType::ErrorPatterns => "error_patterns",
        }
    }
}

impl fmt::Display for InsightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InsightType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown insight type: {s}"))
    }
}

/// 一条学习洞察（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: i64,
    pub insight_type: InsightType,
    pub data: Value,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub times_applied: i64,
    pub success_rate: f64,
}

/// 偏好行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceRecord {
    pub key: String,
    pub value: Value,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
    pub usage_count: i64,
}

/// 工具在某一上下文下的效果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolEffectiveness {
    /// 0.0 ~ 1.0，未见过时为 0.5
    pub success_rate: f64,
    pub usage_count: i64,
    pub avg_execution_time: f64,
    /// usage_count / 10，上限 1.0
    pub confidence: f64,
}

/// 文件知识
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileKnowledge {
    pub file_path: String,
    pub file_type: String,
    pub last_modified: DateTime<Utc>,
    pub access_count: i64,
    pub importance_score: f64,
    pub content_hash: Option<String>,
    pub metadata: Value,
}

/// 各集合行数 + 交互成功率
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub user_preferences_count: i64,
    pub project_patterns_count: i64,
    pub tool_effectiveness_count: i64,
    pub interaction_history_count: i64,
    pub learning_insights_count: i64,
    pub file_knowledge_count: i64,
    pub interaction_success_rate: f64,
}

/// 保留策略执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub interactions_removed: usize,
    pub patterns_removed: usize,
}

enum Backend {
    /// 内存库：唯一的物理连接
    Ephemeral(Connection),
    /// 磁盘库：每次操作重新打开
    OnDisk(PathBuf),
}

/// 持久记忆存储
pub struct PersistentMemory {
    backend: Mutex<Backend>,
}

impl PersistentMemory {
    /// 打开（或创建）存储；路径为 ":memory:" 时使用内存库
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Self::in_memory();
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        drop(conn);

        let store = Self {
            backend: Mutex::new(Backend::OnDisk(path.to_path_buf())),
        };
        match store.cleanup_old_data() {
            Ok(report) if report != CleanupReport::default() => {
                tracing::info!(
                    interactions = report.interactions_removed,
                    patterns = report.patterns_removed,
                    "retention cleanup"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("retention cleanup failed: {}", e),
        }
        Ok(store)
    }

    /// 内存库（测试与临时会话），不执行保留策略
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            backend: Mutex::new(Backend::Ephemeral(conn)),
        })
    }

    pub fn is_ephemeral(&self) -> bool {
        self.backend
            .lock()
            .map(|b| matches!(*b, Backend::Ephemeral(_)))
            .unwrap_or(false)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.backend.lock().map_err(|_| StoreError::LockPoisoned)?;
        match &mut *guard {
            Backend::Ephemeral(conn) => f(conn),
            Backend::OnDisk(path) => {
                let mut conn = Connection::open(&*path)?;
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                f(&mut conn)
            }
        }
    }

    // ---- preferences ----

    /// 写入偏好：usage_count 基于旧行原子递增，confidence 截断到 [0, 1]
    pub fn store_preference(&self, key: &str, value: &Value, confidence: f64) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)?;
        let confidence = confidence.clamp(0.0, 1.0);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preferences (key, value, confidence, last_updated, usage_count)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    confidence = excluded.confidence,
                    last_updated = excluded.last_updated,
                    usage_count = user_preferences.usage_count + 1",
                params![key, encoded, confidence, Utc::now()],
            )?;
            Ok(())
        })
    }

    /// 读取偏好：不存在、无法解码或存储不可用时返回 (default, 0.0)
    pub fn get_preference(&self, key: &str, default: Value) -> (Value, f64) {
        match self.preference_record(key) {
            Ok(Some(rec)) => (rec.value, rec.confidence),
            Ok(None) => (default, 0.0),
            Err(e) => {
                tracing::warn!(key = %key, "get_preference failed: {}", e);
                (default, 0.0)
            }
        }
    }

    /// 完整偏好行；值无法解码时视为不存在
    pub fn preference_record(&self, key: &str) -> Result<Option<PreferenceRecord>, StoreError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value, confidence, last_updated, usage_count
                     FROM user_preferences WHERE key = ?1",
                    params![key],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, f64>(1)?,
                            r.get::<_, DateTime<Utc>>(2)?,
                            r.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?)
        })?;
        Ok(row.and_then(|(raw, confidence, last_updated, usage_count)| {
            match serde_json::from_str(&raw) {
                Ok(value) => Some(PreferenceRecord {
                    key: key.to_string(),
                    value,
                    confidence,
                    last_updated,
                    usage_count,
                }),
                Err(e) => {
                    tracing::warn!(key = %key, "undecodable preference value: {}", e);
                    None
                }
            }
        }))
    }

    /// 所有可解码的偏好，按 key 排序
    pub fn all_preferences(&self) -> Result<Vec<PreferenceRecord>, StoreError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, confidence, last_updated, usage_count
                 FROM user_preferences ORDER BY key",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, f64>(2)?,
                        r.get::<_, DateTime<Utc>>(3)?,
                        r.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, raw, confidence, last_updated, usage_count)| {
                serde_json::from_str(&raw).ok().map(|value| PreferenceRecord {
                    key,
                    value,
                    confidence,
                    last_updated,
                    usage_count,
                })
            })
            .collect())
    }

    // ---- tool effectiveness ----

    /// 记录一次工具使用：计数只增不减，平均耗时 = (old_avg * (n-1) + duration) / n
    pub fn record_tool_usage(
        &self,
        tool: &str,
        context_hash: &str,
        success: bool,
        duration_secs: f64,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let prior: Option<(i64, i64, f64)> = tx
                .query_row(
                    "SELECT success_count, failure_count, avg_execution_time
                     FROM tool_effectiveness WHERE tool_name = ?1 AND context_hash = ?2",
                    params![tool, context_hash],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?;
            let (succ, fail, avg) = prior.unwrap_or((0, 0, 0.0));
            let (succ, fail) = if success { (succ + 1, fail) } else { (succ, fail + 1) };
            let n = (succ + fail) as f64;
            let avg = (avg * (n - 1.0) + duration_secs.max(0.0)) / n;
            tx.execute(
                "INSERT INTO tool_effectiveness
                    (tool_name, context_hash, success_count, failure_count, avg_execution_time, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(tool_name, context_hash) DO UPDATE SET
                    success_count = excluded.success_count,
                    failure_count = excluded.failure_count,
                    avg_execution_time = excluded.avg_execution_time,
                    last_used = excluded.last_used",
                params![tool, context_hash, succ, fail, avg, Utc::now()],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_tool_effectiveness(
        &self,
        tool: &str,
        context_hash: &str,
    ) -> Result<ToolEffectiveness, StoreError> {
        let row: Option<(i64, i64, f64)> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT success_count, failure_count, avg_execution_time
                     FROM tool_effectiveness WHERE tool_name = ?1 AND context_hash = ?2",
                    params![tool, context_hash],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?)
        })?;
        Ok(match row {
            Some((succ, fail, avg)) if succ + fail > 0 => {
                let total = succ + fail;
                ToolEffectiveness {
                    success_rate: succ as f64 / total as f64,
                    usage_count: total,
                    avg_execution_time: avg,
                    confidence: (total as f64 / 10.0).min(1.0),
                }
            }
            _ => ToolEffectiveness {
                success_rate: 0.5,
                usage_count: 0,
                avg_execution_time: 0.0,
                confidence: 0.0,
            },
        })
    }

    // ---- interactions ----

    pub fn record_interaction(&self, interaction: &Interaction) -> Result<i64, StoreError> {
        let action = serde_json::to_string(&interaction.action)?;
        let result = serde_json::to_string(&interaction.result)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO interaction_history
                    (session_id, user_input, action, result, success, timestamp, project_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    interaction.session_id,
                    interaction.user_input,
                    action,
                    result,
                    interaction.success,
                    interaction.timestamp,
                    interaction.project_path,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// 最近的交互（新到旧）；无法解码的行跳过
    pub fn get_recent_interactions(&self, limit: usize) -> Result<Vec<Interaction>, StoreError> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, user_input, action, result, success, timestamp, project_path
                 FROM interaction_history ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, bool>(4)?,
                        r.get::<_, DateTime<Utc>>(5)?,
                        r.get::<_, Option<String>>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(rows
            .into_iter()
            .filter_map(
                |(session_id, user_input, action, result, success, timestamp, project_path)| {
                    Some(Interaction {
                        session_id,
                        user_input,
                        action: serde_json::from_str(&action).ok()?,
                        result: serde_json::from_str(&result).ok()?,
                        timestamp,
                        success,
                        project_path,
                    })
                },
            )
            .collect())
    }

    // ---- insights ----

    /// 追加一条洞察；带身份字段（工具/模式/文件）的洞察取代同类型同身份的旧行，并继承其采用统计
    pub fn store_learning_insight(
        &self,
        insight_type: InsightType,
        data: &Value,
        confidence: f64,
    ) -> Result<i64, StoreError> {
        let encoded = serde_json::to_string(data)?;
        let key = insight_key(data);
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let (times_applied, success_rate) = match &key {
                Some(k) => {
                    let prior: Option<(i64, f64)> = tx
                        .query_row(
                            "SELECT times_applied, success_rate FROM learning_insights
                             WHERE insight_type = ?1 AND insight_key = ?2
                             ORDER BY id DESC LIMIT 1",
                            params![insight_type.as_str(), k],
                            |r| Ok((r.get(0)?, r.get(1)?)),
                        )
                        .optional()?;
                    tx.execute(
                        "DELETE FROM learning_insights WHERE insight_type = ?1 AND insight_key = ?2",
                        params![insight_type.as_str(), k],
                    )?;
                    prior.unwrap_or((0, 0.0))
                }
                None => (0, 0.0),
            };
            tx.execute(
                "INSERT INTO learning_insights
                    (insight_type, insight_key, insight_data, confidence, created_at, times_applied, success_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    insight_type.as_str(),
                    key,
                    encoded,
                    confidence.clamp(0.0, 1.0),
                    Utc::now(),
                    times_applied,
                    success_rate
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })
    }

    /// 按置信度降序、时间降序；不过滤类型时最多 50 条
    pub fn get_learning_insights(&self, insight_type: Option<InsightType>) -> Result<Vec<Insight>, StoreError> {
        let rows = self.with_conn(|conn| {
            let rows = match insight_type {
                Some(t) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, insight_type, insight_data, confidence, created_at, times_applied, success_rate
                         FROM learning_insights WHERE insight_type = ?1
                         ORDER BY confidence DESC, created_at DESC, id DESC",
                    )?;
                    let rows = stmt
                        .query_map(params![t.as_str()], insight_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, insight_type, insight_data, confidence, created_at, times_applied, success_rate
                         FROM learning_insights
                         ORDER BY confidence DESC, created_at DESC, id DESC LIMIT ?1",
                    )?;
                    let rows = stmt
                        .query_map(params![UNFILTERED_INSIGHT_LIMIT], insight_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, ty, data, confidence, created_at, times_applied, success_rate)| {
                Some(Insight {
                    id,
                    insight_type: ty.parse().ok()?,
                    data: serde_json::from_str(&data).ok()?,
                    confidence,
                    created_at,
                    times_applied,
                    success_rate,
                })
            })
            .collect())
    }

    /// 洞察被采用一次（推荐被执行时调用），成功率取运行平均
    pub fn mark_insight_applied(&self, id: i64, success: bool) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE learning_insights SET
                    success_rate = (success_rate * times_applied + ?2) / (times_applied + 1),
                    times_applied = times_applied + 1,
                    last_applied = ?3
                 WHERE id = ?1",
                params![id, if success { 1.0 } else { 0.0 }, Utc::now()],
            )?;
            Ok(())
        })
    }

    // ---- file knowledge ----

    /// 文件被读/写：access_count 递增，importance_score 保持不变
    pub fn update_file_knowledge(
        &self,
        path: &str,
        content: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<(), StoreError> {
        let file_type = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let hash = content.map(|c| sha256_hex(c.as_bytes()));
        let metadata = metadata.map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_knowledge
                    (file_path, file_type, last_modified, access_count, importance_score, content_hash, metadata)
                 VALUES (?1, ?2, ?3, 1, 0.5, ?4, COALESCE(?5, '{}'))
                 ON CONFLICT(file_path) DO UPDATE SET
                    file_type = excluded.file_type,
                    last_modified = excluded.last_modified,
                    access_count = file_knowledge.access_count + 1,
                    content_hash = COALESCE(?4, file_knowledge.content_hash),
                    metadata = COALESCE(?5, file_knowledge.metadata)",
                params![path, file_type, Utc::now(), hash, metadata],
            )?;
            Ok(())
        })
    }

    pub fn set_file_importance(&self, path: &str, score: f64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE file_knowledge SET importance_score = ?2 WHERE file_path = ?1",
                params![path, score.clamp(0.0, 1.0)],
            )?;
            Ok(())
        })
    }

    pub fn get_file_knowledge(&self, path: &str) -> Result<Option<FileKnowledge>, StoreError> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT file_path, file_type, last_modified, access_count, importance_score, content_hash, metadata
                     FROM file_knowledge WHERE file_path = ?1",
                    params![path],
                    file_knowledge_row,
                )
                .optional()?)
        })?;
        Ok(row)
    }

    /// 以 project_prefix 开头的文件，按重要度、访问次数降序
    pub fn get_important_files(&self, project_prefix: &str, limit: usize) -> Result<Vec<FileKnowledge>, StoreError> {
        let pattern = format!("{}%", project_prefix.replace('%', "\\%").replace('_', "\\_"));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT file_path, file_type, last_modified, access_count, importance_score, content_hash, metadata
                 FROM file_knowledge WHERE file_path LIKE ?1 ESCAPE '\\'
                 ORDER BY importance_score DESC, access_count DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![pattern, limit as i64], file_knowledge_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ---- project patterns ----

    /// 按 (项目, 模式类型) upsert，成功率取运行平均
    pub fn record_project_pattern(
        &self,
        project_path: &str,
        pattern_type: &str,
        data: &Value,
        success: bool,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(data)?;
        let hit = if success { 1.0 } else { 0.0 };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO project_patterns
                    (project_path, pattern_type, pattern_data, success_rate, usage_count, last_used)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)
                 ON CONFLICT(project_path, pattern_type) DO UPDATE SET
                    pattern_data = excluded.pattern_data,
                    success_rate = (project_patterns.success_rate * project_patterns.usage_count + ?4)
                                   / (project_patterns.usage_count + 1),
                    usage_count = project_patterns.usage_count + 1,
                    last_used = excluded.last_used",
                params![project_path, pattern_type, encoded, hit, Utc::now()],
            )?;
            Ok(())
        })
    }

    /// 测试与维护用：改写模式的最后使用时间
    pub fn touch_project_pattern(
        &self,
        project_path: &str,
        pattern_type: &str,
        last_used: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE project_patterns SET last_used = ?3 WHERE project_path = ?1 AND pattern_type = ?2",
                params![project_path, pattern_type, last_used],
            )?;
            Ok(())
        })
    }

    // ---- maintenance ----

    pub fn get_memory_stats(&self) -> Result<MemoryStats, StoreError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<i64, rusqlite::Error> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            };
            let (total, ok): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM interaction_history",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            Ok(MemoryStats {
                user_preferences_count: count("user_preferences")?,
                project_patterns_count: count("project_patterns")?,
                tool_effectiveness_count: count("tool_effectiveness")?,
                interaction_history_count: total,
                learning_insights_count: count("learning_insights")?,
                file_knowledge_count: count("file_knowledge")?,
                interaction_success_rate: if total == 0 {
                    0.0
                } else {
                    ok as f64 / total as f64
                },
            })
        })
    }

    /// 保留策略：删除 30 天前的交互，以及 90 天未用且使用少于 5 次的模式
    pub fn cleanup_old_data(&self) -> Result<CleanupReport, StoreError> {
        let now = Utc::now();
        let interaction_cutoff = now - Duration::days(INTERACTION_RETENTION_DAYS);
        let pattern_cutoff = now - Duration::days(PATTERN_RETENTION_DAYS);
        self.with_conn(|conn| {
            let interactions_removed = conn.execute(
                "DELETE FROM interaction_history WHERE timestamp < ?1",
                params![interaction_cutoff],
            )?;
            let patterns_removed = conn.execute(
                "DELETE FROM project_patterns WHERE last_used < ?1 AND usage_count < ?2",
                params![pattern_cutoff, PATTERN_MIN_USAGE],
            )?;
            Ok(CleanupReport {
                interactions_removed,
                patterns_removed,
            })
        })
    }
}

type InsightRow = (i64, String, String, f64, DateTime<Utc>, i64, f64);

/// 洞察身份：type 加上工具、上下文模式、关键词模式、文件路径中出现的字段
fn insight_key(data: &Value) -> Option<String> {
    const IDENTITY: &[&str] = &["tool_name", "pattern", "file_path"];
    if !IDENTITY.iter().any(|f| data.get(*f).is_some()) {
        return None;
    }
    let parts: Vec<&str> = ["type", "tool_name", "context_pattern", "pattern", "file_path"]
        .iter()
        .map(|f| data.get(*f).and_then(Value::as_str).unwrap_or(""))
        .collect();
    Some(parts.join("|"))
}

fn insight_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<InsightRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn file_knowledge_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FileKnowledge> {
    let metadata: String = r.get(6)?;
    Ok(FileKnowledge {
        file_path: r.get(0)?,
        file_type: r.get(1)?,
        last_modified: r.get(2)?,
        access_count: r.get(3)?,
        importance_score: r.get(4)?,
        content_hash: r.get(5)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
    })
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user_preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.5,
            last_updated TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS project_patterns (
            project_path TEXT NOT NULL,
            pattern_type TEXT NOT NULL,
            pattern_data TEXT NOT NULL,
            success_rate REAL NOT NULL DEFAULT 0,
            usage_count INTEGER NOT NULL DEFAULT 0,
            last_used TEXT NOT NULL,
            PRIMARY KEY (project_path, pattern_type)
        );

        CREATE TABLE IF NOT EXISTS tool_effectiveness (
            tool_name TEXT NOT NULL,
            context_hash TEXT NOT NULL,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            avg_execution_time REAL NOT NULL DEFAULT 0,
            last_used TEXT NOT NULL,
            PRIMARY KEY (tool_name, context_hash)
        );

        CREATE TABLE IF NOT EXISTS interaction_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            user_input TEXT NOT NULL,
            action TEXT NOT NULL,
            result TEXT NOT NULL,
            success INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            project_path TEXT
        );

        CREATE TABLE IF NOT EXISTS learning_insights (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            insight_type TEXT NOT NULL,
            insight_key TEXT,
            insight_data TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL,
            last_applied TEXT,
            times_applied INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS file_knowledge (
            file_path TEXT PRIMARY KEY,
            file_type TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            importance_score REAL NOT NULL DEFAULT 0.5,
            content_hash TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_interaction_timestamp ON interaction_history(timestamp);
        CREATE INDEX IF NOT EXISTS idx_interaction_session ON interaction_history(session_id);
        CREATE INDEX IF NOT EXISTS idx_insight_type ON learning_insights(insight_type, confidence);
        CREATE INDEX IF NOT EXISTS idx_insight_key ON learning_insights(insight_type, insight_key);
        "#,
    )?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// 上下文指纹：键排序后的规范 JSON 的 SHA-256
pub fn generate_context_hash(context: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(context, &mut canonical);
    sha256_hex(canonical.as_bytes())
}

fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(&map[k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Action, ToolResult};
    use serde_json::json;

    fn store() -> PersistentMemory {
        PersistentMemory::in_memory().unwrap()
    }

    #[test]
    fn test_preference_round_trip() {
        let m = store();
        m.store_preference("verbosity", &json!("high"), 0.9).unwrap();
        assert_eq!(m.get_preference("verbosity", json!("normal")), (json!("high"), 0.9));
    }

    #[test]
    fn test_preference_usage_count_increments() {
        let m = store();
        m.store_preference("k", &json!(1), 0.5).unwrap();
        m.store_preference("k", &json!(2), 1.7).unwrap();
        let rec = m.preference_record("k").unwrap().unwrap();
        assert_eq!(rec.usage_count, 2);
        assert_eq!(rec.value, json!(2));
        assert_eq!(rec.confidence, 1.0);
    }

    #[test]
    fn test_missing_preference_returns_default() {
        let m = store();
        assert_eq!(m.get_preference("nope", json!(false)), (json!(false), 0.0));
    }

    #[test]
    fn test_undecodable_preference_returns_default() {
        let m = store();
        m.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_preferences (key, value, confidence, last_updated, usage_count)
                 VALUES ('bad', 'not json', 0.9, ?1, 1)",
                params![Utc::now()],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(m.get_preference("bad", json!("d")), (json!("d"), 0.0));
    }

    #[test]
    fn test_tool_effectiveness_running_average() {
        let m = store();
        let unseen = m.get_tool_effectiveness("read_file", "h").unwrap();
        assert_eq!(unseen.success_rate, 0.5);
        assert_eq!(unseen.usage_count, 0);

        m.record_tool_usage("read_file", "h", true, 1.0).unwrap();
        m.record_tool_usage("read_file", "h", true, 2.0).unwrap();
        m.record_tool_usage("read_file", "h", false, 3.0).unwrap();
        let e = m.get_tool_effectiveness("read_file", "h").unwrap();
        assert_eq!(e.usage_count, 3);
        assert!((e.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((e.avg_execution_time - 2.0).abs() < 1e-9);
        assert!((e.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_k_successes_give_full_rate() {
        let m = store();
        for _ in 0..12 {
            m.record_tool_usage("ls", "ctx", true, 0.1).unwrap();
        }
        let e = m.get_tool_effectiveness("ls", "ctx").unwrap();
        assert_eq!(e.success_rate, 1.0);
        assert_eq!(e.usage_count, 12);
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn test_context_hash_order_independent() {
        let mut a = serde_json::Map::new();
        a.insert("session_id".into(), json!("s"));
        a.insert("git_dirty".into(), json!(true));
        a.insert("nested".into(), json!({"b": 1, "a": [1, {"y": 2, "x": 1}]}));
        let mut b = serde_json::Map::new();
        b.insert("nested".into(), json!({"a": [1, {"x": 1, "y": 2}], "b": 1}));
        b.insert("git_dirty".into(), json!(true));
        b.insert("session_id".into(), json!("s"));
        let ha = generate_context_hash(&Value::Object(a));
        assert_eq!(ha, generate_context_hash(&Value::Object(b)));
        assert_eq!(ha.len(), 64);
        assert_ne!(ha, generate_context_hash(&json!({"session_id": "t"})));
    }

    #[test]
    fn test_insights_ordering_and_filter() {
        let m = store();
        m.store_learning_insight(InsightType::ErrorPatterns, &json!({"n": 1}), 0.8).unwrap();
        m.store_learning_insight(InsightType::UserPatterns, &json!({"n": 2}), 0.7).unwrap();
        m.store_learning_insight(InsightType::ErrorPatterns, &json!({"n": 3}), 0.9).unwrap();
        let all = m.get_learning_insights(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].data, json!({"n": 3}));
        let errors = m.get_learning_insights(Some(InsightType::ErrorPatterns)).unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|i| i.insight_type == InsightType::ErrorPatterns));
    }

    #[test]
    fn test_keyed_insight_supersedes_older_row() {
        let m = store();
        let data = json!({"type": "high_effectiveness_tool", "tool_name": "read_file", "context_pattern": "rust"});
        let first = m.store_learning_insight(InsightType::ToolEffectiveness, &data, 0.4).unwrap();
        m.mark_insight_applied(first, true).unwrap();
        m.store_learning_insight(InsightType::ToolEffectiveness, &data, 0.5).unwrap();
        let other = json!({"type": "high_effectiveness_tool", "tool_name": "read_file", "context_pattern": "python"});
        m.store_learning_insight(InsightType::ToolEffectiveness, &other, 0.6).unwrap();

        let rows = m.get_learning_insights(Some(InsightType::ToolEffectiveness)).unwrap();
        assert_eq!(rows.len(), 2);
        let rust = rows.iter().find(|i| i.data["context_pattern"] == "rust").unwrap();
        assert!((rust.confidence - 0.5).abs() < 1e-9);
        assert_eq!(rust.times_applied, 1);
        assert!((rust.success_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unfiltered_insights_capped() {
        let m = store();
        for i in 0..60 {
            m.store_learning_insight(InsightType::UserPatterns, &json!({"i": i}), 0.5).unwrap();
        }
        assert_eq!(m.get_learning_insights(None).unwrap().len(), 50);
        assert_eq!(
            m.get_learning_insights(Some(InsightType::UserPatterns)).unwrap().len(),
            60
        );
    }

    #[test]
    fn test_file_knowledge_preserves_importance() {
        let m = store();
        m.update_file_knowledge("/p/src/Main.RS", Some("fn main(){}"), None).unwrap();
        m.set_file_importance("/p/src/Main.RS", 0.9).unwrap();
        m.update_file_knowledge("/p/src/Main.RS", None, Some(&json!({"lines": 1}))).unwrap();
        let fk = m.get_file_knowledge("/p/src/Main.RS").unwrap().unwrap();
        assert_eq!(fk.access_count, 2);
        assert_eq!(fk.file_type, "rs");
        assert_eq!(fk.importance_score, 0.9);
        assert!(fk.content_hash.is_some());
        assert_eq!(fk.metadata, json!({"lines": 1}));
        let important = m.get_important_files("/p", 5).unwrap();
        assert_eq!(important.len(), 1);
    }

    #[test]
    fn test_recent_interactions_newest_first_and_stats() {
        let m = store();
        let old = Interaction::new("s", "first", Action::new("ls"), ToolResult::ok("ok"))
            .with_timestamp(Utc::now() - Duration::minutes(5));
        let new = Interaction::new("s", "second", Action::new("cat"), ToolResult::failure("e", "m"));
        m.record_interaction(&old).unwrap();
        m.record_interaction(&new).unwrap();
        let recent = m.get_recent_interactions(10).unwrap();
        assert_eq!(recent[0].user_input, "second");
        assert_eq!(recent[1].user_input, "first");
        let stats = m.get_memory_stats().unwrap();
        assert_eq!(stats.interaction_history_count, 2);
        assert_eq!(stats.interaction_success_rate, 0.5);
    }

    #[test]
    fn test_retention_cleanup() {
        let m = store();
        let stale = Interaction::new("s", "old", Action::new("ls"), ToolResult::ok("ok"))
            .with_timestamp(Utc::now() - Duration::days(31));
        let fresh = Interaction::new("s", "recent", Action::new("ls"), ToolResult::ok("ok"))
            .with_timestamp(Utc::now() - Duration::days(29));
        m.record_interaction(&stale).unwrap();
        m.record_interaction(&fresh).unwrap();

        m.record_project_pattern("/p", "build", &json!({}), true).unwrap();
        m.touch_project_pattern("/p", "build", Utc::now() - Duration::days(91)).unwrap();
        m.record_project_pattern("/p", "test", &json!({}), true).unwrap();

        let report = m.cleanup_old_data().unwrap();
        assert_eq!(report.interactions_removed, 1);
        assert_eq!(report.patterns_removed, 1);
        let left = m.get_recent_interactions(10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_input, "recent");
    }
}
