//! Agent 层：代码 Agent（模型调用 + 工具循环）、多回合路由、共享状态与提示词

pub mod core;
pub mod network;
pub mod prompts;
pub mod state;

pub use self::core::{extract_task_summary, CodeAgent, TurnOutcome, TurnPhase, DEFAULT_MAX_TOOL_ROUNDS};
pub use network::{route, Network, NetworkOutcome, RouterDecision, DEFAULT_MAX_ITERATIONS};
pub use state::AgentState;
