//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：一次 complete 返回纯文本或一组工具调用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::{Message, ToolCall};

/// 提供给模型的工具声明（名称、描述、JSON Schema 参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 模型一次回复：要么是最终文本，要么是工具调用请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LlmResponse {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// system 单独传入；tools 为空时模型只能返回文本
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
