//! 结果判定与持久化
//!
//! 判定规则：summary 为空或文件表为空即失败。失败写入一条错误轮；成功写入带生成物（url、标题、文件表）的结果轮。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::AgentState;
use crate::core::AgentError;
use crate::memory::{HistoryStore, NewArtifact, NewTurn, TurnKind};

/// 失败时写给用户的固定文案
pub const FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// 重试耗尽或遇到致命错误时的兜底文案
pub const FATAL_MESSAGE: &str = "Something went wrong.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Success,
    Failure,
}

/// 没有 summary（未宣告完成）与没有文件（什么都没写）都算失败，二者不区分
pub fn classify(state: &AgentState) -> Classification {
    if !state.has_summary() || state.files.is_empty() {
        Classification::Failure
    } else {
        Classification::Success
    }
}

/// 工作流返回值；最终状态以持久化的轮次类型为准
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
    pub summary: String,
    pub success: bool,
    /// 持久化的助手轮 ID
    pub turn_id: String,
}

/// 按判定结果构造要写入的助手轮
pub fn build_turn(
    conversation_id: &str,
    state: &AgentState,
    url: &str,
    title: &str,
    response: &str,
) -> NewTurn {
    match classify(state) {
        Classification::Failure => {
            NewTurn::assistant(conversation_id, FAILURE_MESSAGE, TurnKind::Error)
        }
        Classification::Success => {
            NewTurn::assistant(conversation_id, response, TurnKind::Result).with_artifact(
                NewArtifact {
                    sandbox_url: url.to_string(),
                    title: title.to_string(),
                    files: state.files.clone(),
                },
            )
        }
    }
}

/// 工作流之外的兜底错误轮（重试耗尽 / 致命错误）
pub async fn persist_fatal(
    store: &dyn HistoryStore,
    conversation_id: &str,
) -> Result<String, AgentError> {
    let turn = store
        .create_turn(NewTurn::assistant(
            conversation_id,
            FATAL_MESSAGE,
            TurnKind::Error,
        ))
        .await?;
    Ok(turn.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(summary: &str, files: &[(&str, &str)]) -> AgentState {
        let mut state = AgentState::new();
        state.set_summary_once(summary);
        state.merge_files(
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        );
        state
    }

    #[test]
    fn test_classify_requires_summary_and_files() {
        assert_eq!(classify(&state("", &[])), Classification::Failure);
        assert_eq!(classify(&state("done", &[])), Classification::Failure);
        assert_eq!(
            classify(&state("", &[("app/page.tsx", "x")])),
            Classification::Failure
        );
        assert_eq!(
            classify(&state("done", &[("app/page.tsx", "x")])),
            Classification::Success
        );
    }

    #[test]
    fn test_build_turn_failure_has_no_artifact() {
        let turn = build_turn("c1", &state("", &[]), "https://x", "T", "R");
        assert_eq!(turn.content, FAILURE_MESSAGE);
        assert_eq!(turn.kind, TurnKind::Error);
        assert!(turn.artifact.is_none());
    }

    #[test]
    fn test_build_turn_success_carries_artifact() {
        let turn = build_turn(
            "c1",
            &state("done", &[("app/footer.tsx", "f")]),
            "https://3000-sbx.localhost",
            "Footer",
            "Added it",
        );
        assert_eq!(turn.kind, TurnKind::Result);
        assert_eq!(turn.content, "Added it");
        let artifact = turn.artifact.unwrap();
        assert_eq!(artifact.title, "Footer");
        assert!(artifact.files.contains_key("app/footer.tsx"));
    }
}
