//! 多回合路由
//!
//! 每个 Agent 回合结束后决定是否继续：summary 已写入即停止，回合数达到上限也停止。
//! 消息在回合之间累积，首回合以历史上下文加用户原文作为输入。

use crate::agent::{AgentState, CodeAgent};
use crate::core::AgentError;
use crate::memory::{to_messages, ContextTurn, Message};
use crate::tools::ToolContext;

/// 默认最大回合数
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterDecision {
    Continue,
    Stop,
}

/// 路由规则：纯函数，只看共享状态与已完成回合数
pub fn route(state: &AgentState, iterations: usize, max_iterations: usize) -> RouterDecision {
    if state.has_summary() || iterations >= max_iterations {
        RouterDecision::Stop
    } else {
        RouterDecision::Continue
    }
}

/// 一次网络运行的结果
#[derive(Debug)]
pub struct NetworkOutcome {
    pub iterations: usize,
    /// 最后一个回合的最终文本（回合被工具轮数上限截断时为 None）
    pub last_text: Option<String>,
    pub messages: Vec<Message>,
}

pub struct Network {
    agent: CodeAgent,
    max_iterations: usize,
}

impl Network {
    pub fn new(agent: CodeAgent, max_iterations: usize) -> Self {
        Self {
            agent,
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub async fn run(
        &self,
        history: &[ContextTurn],
        user_text: &str,
        ctx: &mut ToolContext<'_>,
    ) -> Result<NetworkOutcome, AgentError> {
        let mut messages = to_messages(history);
        messages.push(Message::user(user_text));

        let mut iterations = 0;
        let mut last_text = None;
        while route(ctx.state, iterations, self.max_iterations) == RouterDecision::Continue {
            let turn = self.agent.run_turn(&mut messages, ctx).await?;
            iterations += 1;
            tracing::info!(
                run_id = %ctx.runner.run_id(),
                iteration = iterations,
                tool_rounds = turn.tool_rounds,
                has_summary = ctx.state.has_summary(),
                "agent turn finished"
            );
            last_text = turn.final_text;
        }

        if !ctx.state.has_summary() {
            tracing::warn!(run_id = %ctx.runner.run_id(), iterations, "network stopped without task summary");
        }
        Ok(NetworkOutcome {
            iterations,
            last_text,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_stops_on_summary() {
        let mut state = AgentState::new();
        assert_eq!(route(&state, 0, 5), RouterDecision::Continue);
        state.set_summary_once("done");
        assert_eq!(route(&state, 1, 5), RouterDecision::Stop);
    }

    #[test]
    fn test_route_stops_at_max_iterations() {
        let state = AgentState::new();
        assert_eq!(route(&state, 4, 5), RouterDecision::Continue);
        assert_eq!(route(&state, 5, 5), RouterDecision::Stop);
        assert_eq!(route(&state, 0, 0), RouterDecision::Stop);
    }
}
