//! 核心层：错误类型、恢复策略与运行时装配

pub mod builder;
pub mod error;
pub mod recovery;

pub use builder::{create_llm_from_config, Runtime, RuntimeBuilder};
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
