//! 记忆层：会话级工作记忆（进程内）与跨会话持久记忆（SQLite）

pub mod interaction;
pub mod persistent;
pub mod working;

pub use interaction::Interaction;
pub use persistent::{
    generate_context_hash, CleanupReport, FileKnowledge, Insight, InsightType, MemoryStats,
    PersistentMemory, PreferenceRecord, ToolEffectiveness,
};
pub use working::{extract_pattern, CachedFile, ContextSummary, Session, SessionSummary, WorkingMemory};
