//! 步骤日志：按 (run_id, seq) 追加写入的已完成步骤记录
//!
//! 续跑时按 seq 顺序回放；MemoryJournal 用于测试与单进程，SqliteJournal 跨进程重启保留。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 单条已完成步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    /// 运行内顺序号（从 0 开始）
    pub seq: u64,
    /// 步骤键：首次为步骤名，之后为 `name:1`、`name:2` …
    pub step_key: String,
    /// 序列化后的步骤结果（JSON）
    pub output: String,
}

/// 追加式步骤日志
#[async_trait]
pub trait StepJournal: Send + Sync {
    /// 按 seq 升序返回某次运行的全部记录
    async fn load(&self, run_id: &str) -> Result<Vec<StepRecord>, AgentError>;

    /// 追加一条记录；(run_id, seq) 或 (run_id, step_key) 冲突时报错
    async fn append(&self, record: &StepRecord) -> Result<(), AgentError>;
}

/// 内存日志
#[derive(Debug, Default)]
pub struct MemoryJournal {
    runs: Mutex<HashMap<String, Vec<StepRecord>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某次运行已记录的步骤数
    pub fn len(&self, run_id: &str) -> usize {
        self.runs
            .lock()
            .map(|runs| runs.get(run_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl StepJournal for MemoryJournal {
    async fn load(&self, run_id: &str) -> Result<Vec<StepRecord>, AgentError> {
        let runs = self
            .runs
            .lock()
            .map_err(|e| AgentError::Journal(e.to_string()))?;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    async fn append(&self, record: &StepRecord) -> Result<(), AgentError> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|e| AgentError::Journal(e.to_string()))?;
        let entries = runs.entry(record.run_id.clone()).or_default();
        if entries.len() as u64 != record.seq {
            return Err(AgentError::Journal(format!(
                "non-contiguous append for run {}: expected seq {}, got {}",
                record.run_id,
                entries.len(),
                record.seq
            )));
        }
        if entries.iter().any(|r| r.step_key == record.step_key) {
            return Err(AgentError::Journal(format!(
                "step '{}' already journaled for run {}",
                record.step_key, record.run_id
            )));
        }
        entries.push(record.clone());
        Ok(())
    }
}

/// SQLite 日志（rusqlite，同步连接放在 Mutex 中；单条读写很短，不跨 await 持锁）
pub struct SqliteJournal {
    conn: Mutex<Connection>,
}

impl SqliteJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::Journal(e.to_string()))?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS step_journal (
                run_id     TEXT NOT NULL,
                seq        INTEGER NOT NULL,
                step_key   TEXT NOT NULL,
                output     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, seq),
                UNIQUE (run_id, step_key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl StepJournal for SqliteJournal {
    async fn load(&self, run_id: &str) -> Result<Vec<StepRecord>, AgentError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgentError::Journal(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT run_id, seq, step_key, output FROM step_journal
             WHERE run_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(StepRecord {
                run_id: row.get(0)?,
                seq: row.get::<_, i64>(1)? as u64,
                step_key: row.get(2)?,
                output: row.get(3)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    async fn append(&self, record: &StepRecord) -> Result<(), AgentError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgentError::Journal(e.to_string()))?;
        conn.execute(
            "INSERT INTO step_journal (run_id, seq, step_key, output, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.run_id,
                record.seq as i64,
                record.step_key,
                record.output,
                chrono::Utc::now(),
            ],
        )
        .map_err(|e| {
            AgentError::Journal(format!(
                "append step '{}' for run {}: {e}",
                record.step_key, record.run_id
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, key: &str) -> StepRecord {
        StepRecord {
            run_id: "run-1".to_string(),
            seq,
            step_key: key.to_string(),
            output: "\"ok\"".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_journal_roundtrip_in_order() {
        let journal = SqliteJournal::in_memory().unwrap();
        journal.append(&record(0, "get-sandbox-id")).await.unwrap();
        journal.append(&record(1, "agent-inference")).await.unwrap();
        let loaded = journal.load("run-1").await.unwrap();
        let keys: Vec<_> = loaded.iter().map(|r| r.step_key.as_str()).collect();
        assert_eq!(keys, vec!["get-sandbox-id", "agent-inference"]);
        assert!(journal.load("run-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_journal_rejects_duplicate_key() {
        let journal = SqliteJournal::in_memory().unwrap();
        journal.append(&record(0, "save-result")).await.unwrap();
        let err = journal.append(&record(1, "save-result")).await.unwrap_err();
        assert!(matches!(err, AgentError::Journal(_)));
    }

    #[tokio::test]
    async fn test_sqlite_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            let journal = SqliteJournal::open(&path).unwrap();
            journal.append(&record(0, "get-sandbox-id")).await.unwrap();
        }
        let reopened = SqliteJournal::open(&path).unwrap();
        assert_eq!(reopened.load("run-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_journal_rejects_gap() {
        let journal = MemoryJournal::new();
        let err = journal.append(&record(1, "x")).await.unwrap_err();
        assert!(matches!(err, AgentError::Journal(_)));
        assert_eq!(journal.len("run-1"), 0);
    }
}
