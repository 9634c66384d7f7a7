//! 请求入口
//!
//! submit 先把用户输入落库为一轮对话，再把运行请求放入队列，立即返回确认；实际执行由 WorkflowWorker 异步完成。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::AgentError;
use crate::memory::{HistoryStore, NewTurn};

/// 一次运行请求；重试时 run_id 保持不变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: String,
    pub conversation_id: String,
    pub text: String,
    /// 入口处已落库的用户轮，加载历史时排除
    #[serde(default)]
    pub user_turn_id: Option<String>,
}

impl RunRequest {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4().simple()),
            conversation_id: conversation_id.into(),
            text: text.into(),
            user_turn_id: None,
        }
    }
}

/// 入队确认
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub run_id: String,
    pub conversation_id: String,
    pub turn_id: String,
}

#[derive(Clone)]
pub struct PromptIngress {
    history: Arc<dyn HistoryStore>,
    tx: mpsc::Sender<RunRequest>,
}

impl PromptIngress {
    /// 创建入口与对应的接收端（交给 WorkflowWorker）
    pub fn channel(
        history: Arc<dyn HistoryStore>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<RunRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { history, tx }, rx)
    }

    pub async fn submit(&self, conversation_id: &str, text: &str) -> Result<Ack, AgentError> {
        if conversation_id.trim().is_empty() {
            return Err(AgentError::InvalidRequest("conversation_id is empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(AgentError::InvalidRequest("prompt text is empty".to_string()));
        }

        let turn = self
            .history
            .create_turn(NewTurn::user(conversation_id, text))
            .await?;
        let mut request = RunRequest::new(conversation_id, text);
        request.user_turn_id = Some(turn.id.clone());
        let run_id = request.run_id.clone();

        self.tx
            .send(request)
            .await
            .map_err(|_| AgentError::InvalidRequest("run queue is closed".to_string()))?;
        tracing::info!(run_id = %run_id, conversation_id = %conversation_id, "prompt accepted");

        Ok(Ack {
            run_id,
            conversation_id: conversation_id.to_string(),
            turn_id: turn.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryHistoryStore, TurnRole};

    #[tokio::test]
    async fn test_submit_persists_user_turn_and_enqueues() {
        let store = Arc::new(MemoryHistoryStore::new());
        let (ingress, mut rx) = PromptIngress::channel(store.clone(), 4);

        let ack = ingress.submit("c1", "add a footer").await.unwrap();
        let request = rx.recv().await.unwrap();
        assert_eq!(request.run_id, ack.run_id);
        assert_eq!(request.text, "add a footer");
        assert_eq!(request.user_turn_id.as_deref(), Some(ack.turn_id.as_str()));

        let turns = store.all_turns("c1").await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::User);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_prompt() {
        let store = Arc::new(MemoryHistoryStore::new());
        let (ingress, _rx) = PromptIngress::channel(store.clone(), 4);
        let err = ingress.submit("c1", "   ").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
        assert!(store.all_turns("c1").await.is_empty());
    }
}
