//! 代码 Agent：一个回合内的「模型调用 -> 工具调用 -> 再调用模型」循环
//!
//! 两态循环：模型返回工具调用（ToolCall）则依次执行并把结果作为 tool 消息追加，再次调用模型；
//! 返回纯文本（Final）则结束本回合。每次模型调用都是持久化步骤 `agent-inference`，
//! 续跑时回放同样的回复。回合结束时扫描最终文本中的完成标记，写入共享状态的 summary。

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmResponse};
use crate::memory::{Message, ToolCall};
use crate::tools::{ToolContext, ToolExecutor};

/// 单回合内最多执行的工具轮数
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 20;

const INFERENCE_STEP: &str = "agent-inference";

/// 模型回复对应的循环状态
#[derive(Debug, Clone, PartialEq)]
pub enum TurnPhase {
    ToolCall(Vec<ToolCall>),
    Final(String),
}

impl From<LlmResponse> for TurnPhase {
    fn from(response: LlmResponse) -> Self {
        match response {
            LlmResponse::ToolCalls(calls) if !calls.is_empty() => TurnPhase::ToolCall(calls),
            LlmResponse::ToolCalls(_) => TurnPhase::Final(String::new()),
            LlmResponse::Text(text) => TurnPhase::Final(text),
        }
    }
}

/// 一个回合的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// 模型的最终文本；工具轮数触顶时为 None
    pub final_text: Option<String>,
    pub tool_rounds: usize,
}

static SUMMARY_RE: OnceLock<Regex> = OnceLock::new();

/// 提取完成标记中的内容（去除首尾空白）；没有标记或内容为空时返回 None
pub fn extract_task_summary(text: &str) -> Option<String> {
    let re = SUMMARY_RE
        .get_or_init(|| Regex::new(r"(?s)<task_summary>(.*?)</task_summary>").unwrap());
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub struct CodeAgent {
    system_prompt: String,
    executor: ToolExecutor,
    llm: Arc<dyn LlmClient>,
    max_tool_rounds: usize,
}

impl CodeAgent {
    pub fn new(
        system_prompt: impl Into<String>,
        executor: ToolExecutor,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            executor,
            llm,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    /// 系统提示词 + 当前共享状态
    fn system_message(&self, ctx: &ToolContext<'_>) -> String {
        format!("{}\n\n{}", self.system_prompt, ctx.state.context_block())
    }

    /// 执行一个回合；messages 原地追加本回合产生的 assistant / tool 消息
    pub async fn run_turn(
        &self,
        messages: &mut Vec<Message>,
        ctx: &mut ToolContext<'_>,
    ) -> Result<TurnOutcome, AgentError> {
        let tools = self.executor.definitions();
        let mut tool_rounds = 0;

        loop {
            let system = self.system_message(ctx);
            let history: &[Message] = messages;
            let llm = &self.llm;
            let tools_ref = &tools;
            let response: LlmResponse = ctx
                .runner
                .run(INFERENCE_STEP, || async move {
                    llm.complete(&system, history, tools_ref)
                        .await
                        .map_err(AgentError::LlmError)
                })
                .await?;

            match TurnPhase::from(response) {
                TurnPhase::Final(text) => {
                    messages.push(Message::assistant(text.clone()));
                    self.observe(&text, ctx);
                    return Ok(TurnOutcome {
                        final_text: Some(text),
                        tool_rounds,
                    });
                }
                TurnPhase::ToolCall(calls) => {
                    messages.push(Message::tool_calls(calls.clone()));
                    for call in &calls {
                        tracing::debug!(run_id = %ctx.runner.run_id(), tool = %call.name, "dispatching tool call");
                        let result = self.executor.execute(call, ctx).await?;
                        messages.push(Message::tool_result(call.id.clone(), result));
                    }
                    tool_rounds += 1;
                    if tool_rounds >= self.max_tool_rounds {
                        tracing::warn!(run_id = %ctx.runner.run_id(), tool_rounds, "tool round limit reached, ending turn");
                        return Ok(TurnOutcome {
                            final_text: None,
                            tool_rounds,
                        });
                    }
                }
            }
        }
    }

    /// 完成标记观察：summary 只在仍为空时写入
    fn observe(&self, text: &str, ctx: &mut ToolContext<'_>) {
        if let Some(summary) = extract_task_summary(text) {
            if ctx.state.set_summary_once(summary) {
                tracing::info!(run_id = %ctx.runner.run_id(), "task summary recorded");
            }
        }
    }
}
