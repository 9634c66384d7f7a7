//! 对话上下文加载
//!
//! 取当前会话最近 N 轮（存储按新到旧返回），翻转为时间顺序并映射为模型消息；只读，无副作用。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::history::{HistoryStore, TurnRole};
use crate::memory::Message;

/// 默认加载的历史轮数
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// 步骤日志中保存的上下文形态（只保留角色与内容）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ContextTurn {
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::Assistant => Message::assistant(self.content.clone()),
            TurnRole::User => Message::user(self.content.clone()),
        }
    }
}

/// 加载最近 limit 轮，按时间顺序返回
pub async fn load_context(
    store: &dyn HistoryStore,
    conversation_id: &str,
    limit: usize,
) -> Result<Vec<ContextTurn>, AgentError> {
    let mut turns = store.list_recent_turns(conversation_id, limit).await?;
    turns.reverse();
    Ok(turns
        .into_iter()
        .map(|t| ContextTurn {
            role: t.role,
            content: t.content,
        })
        .collect())
}

/// 加载触发本次运行的用户轮之前的最近 limit 轮（该轮已在入口处落库，由模型输入单独携带）
pub async fn load_prior_context(
    store: &dyn HistoryStore,
    conversation_id: &str,
    limit: usize,
    current_turn_id: Option<&str>,
) -> Result<Vec<ContextTurn>, AgentError> {
    let Some(current) = current_turn_id else {
        return load_context(store, conversation_id, limit).await;
    };
    let mut turns: Vec<_> = store
        .list_recent_turns(conversation_id, limit + 1)
        .await?
        .into_iter()
        .filter(|t| t.id != current)
        .take(limit)
        .collect();
    turns.reverse();
    Ok(turns
        .into_iter()
        .map(|t| ContextTurn {
            role: t.role,
            content: t.content,
        })
        .collect())
}

/// 转为模型消息序列
pub fn to_messages(turns: &[ContextTurn]) -> Vec<Message> {
    turns.iter().map(ContextTurn::to_message).collect()
}
