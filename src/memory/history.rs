//! 对话历史存储抽象层
//!
//! 定义统一的历史读写接口（最近 N 轮 / 新建一轮），支持内存与 SQLite 两种实现。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::AgentError;

/// 持久化轮次的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    /// 未知角色一律按 user 处理
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("assistant") {
            TurnRole::Assistant
        } else {
            TurnRole::User
        }
    }
}

/// 轮次类型：正常结果 / 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnKind {
    Result,
    Error,
}

impl TurnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnKind::Result => "result",
            TurnKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("error") {
            TurnKind::Error
        } else {
            TurnKind::Result
        }
    }
}

/// 生成物：沙箱地址、标题与完整文件表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

/// 已持久化的一轮对话（不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    pub kind: TurnKind,
    pub artifact: Option<Artifact>,
    pub created_at: DateTime<Utc>,
}

/// 新建轮次请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTurn {
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    pub kind: TurnKind,
    /// 成功结果附带的生成物
    pub artifact: Option<NewArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

impl NewTurn {
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: TurnRole::User,
            content: content.into(),
            kind: TurnKind::Result,
            artifact: None,
        }
    }

    pub fn assistant(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        kind: TurnKind,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: TurnRole::Assistant,
            content: content.into(),
            kind,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: NewArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// 落库时分配 ID 与时间戳
    pub(crate) fn into_turn(self) -> Turn {
        Turn {
            id: format!("turn_{}", uuid::Uuid::new_v4()),
            conversation_id: self.conversation_id,
            role: self.role,
            content: self.content,
            kind: self.kind,
            artifact: self.artifact.map(|a| Artifact {
                id: format!("artifact_{}", uuid::Uuid::new_v4()),
                sandbox_url: a.sandbox_url,
                title: a.title,
                files: a.files,
            }),
            created_at: Utc::now(),
        }
    }
}

/// 历史存储接口
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 最近 limit 轮，按时间从新到旧
    async fn list_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Turn>, AgentError>;

    async fn create_turn(&self, turn: NewTurn) -> Result<Turn, AgentError>;
}

/// 内存历史存储
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    turns: RwLock<Vec<Turn>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某会话的全部轮次（按写入顺序）
    pub async fn all_turns(&self, conversation_id: &str) -> Vec<Turn> {
        self.turns
            .read()
            .await
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn list_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Turn>, AgentError> {
        Ok(self
            .turns
            .read()
            .await
            .iter()
            .rev()
            .filter(|t| t.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_turn(&self, turn: NewTurn) -> Result<Turn, AgentError> {
        let turn = turn.into_turn();
        self.turns.write().await.push(turn.clone());
        Ok(turn)
    }
}
