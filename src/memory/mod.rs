//! 记忆层：模型消息、对话历史存储（内存 / SQLite）与上下文加载

pub mod context;
pub mod conversation;
pub mod history;
pub mod sqlite;

pub use context::{load_context, load_prior_context, to_messages, ContextTurn, DEFAULT_HISTORY_LIMIT};
pub use conversation::{Message, Role, ToolCall};
pub use history::{
    Artifact, HistoryStore, MemoryHistoryStore, NewArtifact, NewTurn, Turn, TurnKind, TurnRole,
};
pub use sqlite::SqliteHistoryStore;
