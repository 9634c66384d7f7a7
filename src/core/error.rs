//! 工作流错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Retry（同一 run_id 续跑）或 Abort。

use thiserror::Error;

use crate::sandbox::SandboxError;

/// 工作流运行过程中可能出现的错误（沙箱、LLM、步骤日志、存储等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 同名步骤在同一次运行中并发执行
    #[error("Duplicate step in flight: {0}")]
    DuplicateStep(String),

    /// 续跑时步骤顺序与日志不一致
    #[error("Step out of order: journal has '{expected}', workflow issued '{found}'")]
    StepOutOfOrder { expected: String, found: String },

    #[error("Step journal error: {0}")]
    Journal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AgentError {
    /// 续跑类错误：重试只会再次撞上同一问题，必须终止
    pub fn is_resumption_error(&self) -> bool {
        matches!(
            self,
            AgentError::DuplicateStep(_) | AgentError::StepOutOfOrder { .. }
        )
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Storage(e.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以同一 run_id 重新执行工作流，已完成步骤从日志回放
    Retry,
    /// 终止当前运行
    Abort,
}
