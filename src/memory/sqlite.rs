//! SQLite 历史存储
//!
//! 表结构：turns（每轮对话）与 artifacts（成功结果的生成物，与 turn 一对一）；文件表以 JSON 文本存储。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::core::AgentError;
use crate::memory::history::{Artifact, HistoryStore, NewTurn, Turn, TurnKind, TurnRole};

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::Storage(e.to_string()))?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                kind            TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_conversation
                ON turns (conversation_id, created_at);
            CREATE TABLE IF NOT EXISTS artifacts (
                id          TEXT PRIMARY KEY,
                turn_id     TEXT NOT NULL UNIQUE REFERENCES turns (id),
                sandbox_url TEXT NOT NULL,
                title       TEXT NOT NULL,
                files       TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|e| AgentError::Storage(format!("history connection poisoned: {e}")))
    }
}

/// 查询行：turn 列 + 可空的 artifact 列
struct TurnRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    kind: String,
    created_at: DateTime<Utc>,
    artifact_id: Option<String>,
    sandbox_url: Option<String>,
    title: Option<String>,
    files: Option<String>,
}

impl TurnRow {
    fn into_turn(self) -> Result<Turn, AgentError> {
        let artifact = match (self.artifact_id, self.sandbox_url, self.title, self.files) {
            (Some(id), Some(sandbox_url), Some(title), Some(files)) => {
                let files: BTreeMap<String, String> = serde_json::from_str(&files)?;
                Some(Artifact {
                    id,
                    sandbox_url,
                    title,
                    files,
                })
            }
            _ => None,
        };
        Ok(Turn {
            id: self.id,
            conversation_id: self.conversation_id,
            role: TurnRole::parse(&self.role),
            content: self.content,
            kind: TurnKind::parse(&self.kind),
            artifact,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn list_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Turn>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.conversation_id, t.role, t.content, t.kind, t.created_at,
                    a.id, a.sandbox_url, a.title, a.files
             FROM turns t
             LEFT JOIN artifacts a ON a.turn_id = t.id
             WHERE t.conversation_id = ?1
             ORDER BY t.created_at DESC, t.rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit as i64], |row| {
            Ok(TurnRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                kind: row.get(4)?,
                created_at: row.get(5)?,
                artifact_id: row.get(6)?,
                sandbox_url: row.get(7)?,
                title: row.get(8)?,
                files: row.get(9)?,
            })
        })?;

        let mut turns = Vec::new();
        for row in rows {
            turns.push(row?.into_turn()?);
        }
        Ok(turns)
    }

    async fn create_turn(&self, turn: NewTurn) -> Result<Turn, AgentError> {
        let turn = turn.into_turn();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO turns (id, conversation_id, role, content, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                turn.id,
                turn.conversation_id,
                turn.role.as_str(),
                turn.content,
                turn.kind.as_str(),
                turn.created_at,
            ],
        )?;
        if let Some(artifact) = &turn.artifact {
            tx.execute(
                "INSERT INTO artifacts (id, turn_id, sandbox_url, title, files)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    artifact.id,
                    turn.id,
                    artifact.sandbox_url,
                    artifact.title,
                    serde_json::to_string(&artifact.files)?,
                ],
            )?;
        }
        tx.commit()?;
        tracing::debug!(turn_id = %turn.id, conversation_id = %turn.conversation_id, kind = turn.kind.as_str(), "turn persisted");
        Ok(turn)
    }
}
