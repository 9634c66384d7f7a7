//! 工具执行器
//!
//! 持有 ToolRegistry，按模型给出的工具调用分发到具体工具；未知工具以文本回报模型。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use crate::core::AgentError;
use crate::llm::ToolDefinition;
use crate::memory::ToolCall;
use crate::tools::{Tool, ToolContext, ToolRegistry};

/// 工具执行器：分发调用并记录审计日志
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// 执行一次工具调用；返回给模型的文本，Err 仅来自步骤日志
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &mut ToolContext<'_>,
    ) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&call.arguments);

        let result = match self.registry.get_by_name(&call.name) {
            Some(tool) => tool.call(call.arguments.clone(), ctx).await,
            None => Ok(format!(
                "Unknown tool: {}. Available tools: {}",
                call.name,
                self.registry.tool_names().join(", ")
            )),
        };

        let outcome = match &result {
            Ok(text) if is_failure_text(text) => "error",
            Ok(_) => "ok",
            Err(_) => "fatal",
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "run_id": ctx.runner.run_id(),
            "tool": call.name,
            "call_id": call.id,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get_by_name(name)
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.registry.tool_names()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}

fn is_failure_text(text: &str) -> bool {
    text.starts_with("Error:")
        || text.starts_with("Command failed:")
        || text.starts_with("Invalid arguments for")
        || text.starts_with("Unknown tool:")
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
