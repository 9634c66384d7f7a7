//! 错误恢复引擎
//!
//! 根据 AgentError 类型与已尝试次数返回 RecoveryAction，供 WorkflowWorker 决定是续跑还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：瞬时错误重试，续跑/请求错误直接终止
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_retries: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RecoveryEngine {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// attempt 从 1 开始计数（第一次执行即 attempt=1）
    pub fn handle(&self, err: &AgentError, attempt: u32) -> RecoveryAction {
        if err.is_resumption_error() {
            return RecoveryAction::Abort;
        }
        match err {
            AgentError::InvalidRequest(_) | AgentError::ConfigError(_) => RecoveryAction::Abort,
            AgentError::Sandbox(_)
            | AgentError::LlmError(_)
            | AgentError::Journal(_)
            | AgentError::Storage(_)
            | AgentError::Serialization(_) => {
                if attempt <= self.max_retries {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Abort
                }
            }
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxError;

    #[test]
    fn test_recovery_transient_errors_retry() {
        let engine = RecoveryEngine::new(2);
        let err = AgentError::LlmError("503".to_string());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Retry);
        assert_eq!(engine.handle(&err, 2), RecoveryAction::Retry);
        assert_eq!(engine.handle(&err, 3), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_sandbox_unreachable_retries() {
        let engine = RecoveryEngine::default();
        let err = AgentError::Sandbox(SandboxError::Connection("refused".to_string()));
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Retry);
    }

    #[test]
    fn test_recovery_resumption_errors_abort() {
        let engine = RecoveryEngine::default();
        let dup = AgentError::DuplicateStep("write-files".to_string());
        let order = AgentError::StepOutOfOrder {
            expected: "a".to_string(),
            found: "b".to_string(),
        };
        assert_eq!(engine.handle(&dup, 1), RecoveryAction::Abort);
        assert_eq!(engine.handle(&order, 1), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_invalid_request_aborts() {
        let engine = RecoveryEngine::default();
        let err = AgentError::InvalidRequest("empty prompt".to_string());
        assert_eq!(engine.handle(&err, 1), RecoveryAction::Abort);
    }
}
