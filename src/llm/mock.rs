//! Mock LLM 客户端（无需 API）
//!
//! - MockLlmClient：确定性演示后端，先用 write_files 写一个页面，再输出带完成标记的总结。
//! - ScriptedLlmClient：按预设顺序返回回复并记录每次请求，供测试驱动 Agent 循环。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmResponse, ToolDefinition};
use crate::memory::{Message, Role, ToolCall};

/// 演示客户端：根据对话所处阶段生成回复
#[derive(Debug, Default)]
pub struct MockLlmClient;

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, String> {
        let prompt = last_user(messages);

        if tools.is_empty() {
            let first_line = prompt.lines().next().unwrap_or_default();
            return Ok(LlmResponse::Text(first_line.chars().take(60).collect()));
        }

        let has_tool_result = messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::User)
            .any(|m| m.role == Role::Tool);
        if has_tool_result {
            return Ok(LlmResponse::Text(format!(
                "<task_summary>Created app/page.tsx for: {prompt}</task_summary>"
            )));
        }

        let page = format!(
            "export default function Page() {{\n  return <main>{}</main>;\n}}\n",
            prompt.replace('{', "&#123;").replace('}', "&#125;")
        );
        Ok(LlmResponse::ToolCalls(vec![ToolCall {
            id: "call_mock_1".to_string(),
            name: "write_files".to_string(),
            arguments: serde_json::json!({
                "files": [{ "path": "app/page.tsx", "content": page }]
            }),
        }]))
    }
}

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// 脚本客户端：队列耗尽后返回 fallback
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<LlmResponse, String>>>,
    fallback: LlmResponse,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<LlmResponse, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: LlmResponse::Text(String::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: LlmResponse) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 带工具的请求次数（即 Agent 推理次数）
    pub fn tool_call_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| !r.tool_names.is_empty())
            .count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                system: system.to_string(),
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tool() -> ToolDefinition {
        ToolDefinition {
            name: "write_files".to_string(),
            description: String::new(),
            parameters: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_mock_writes_then_summarizes() {
        let client = MockLlmClient;
        let mut messages = vec![Message::user("a landing page")];
        let tools = vec![write_tool()];

        let first = client.complete("sys", &messages, &tools).await.unwrap();
        let LlmResponse::ToolCalls(calls) = first else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].name, "write_files");

        messages.push(Message::tool_calls(calls.clone()));
        messages.push(Message::tool_result(calls[0].id.clone(), "ok"));
        let second = client.complete("sys", &messages, &tools).await.unwrap();
        assert!(matches!(second, LlmResponse::Text(t) if t.contains("<task_summary>")));
    }

    #[tokio::test]
    async fn test_scripted_falls_back_when_exhausted() {
        let client = ScriptedLlmClient::new(vec![Ok(LlmResponse::Text("one".to_string()))])
            .with_fallback(LlmResponse::Text("again".to_string()));
        let tools = vec![write_tool()];
        let a = client.complete("s", &[], &tools).await.unwrap();
        let b = client.complete("s", &[], &[]).await.unwrap();
        assert_eq!(a, LlmResponse::Text("one".to_string()));
        assert_eq!(b, LlmResponse::Text("again".to_string()));
        assert_eq!(client.requests().len(), 2);
        assert_eq!(client.tool_call_requests(), 1);
    }
}
