//! 工作流层：代码生成工作流、结果判定与持久化、请求入口与后台 worker

pub mod code_agent;
pub mod ingress;
pub mod result;
pub mod worker;

pub use code_agent::{CodeAgentWorkflow, WorkflowDeps, WorkflowSettings};
pub use ingress::{Ack, PromptIngress, RunRequest};
pub use result::{classify, Classification, WorkflowResult, FAILURE_MESSAGE, FATAL_MESSAGE};
pub use worker::{RunReport, WorkflowWorker};
