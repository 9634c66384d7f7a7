//! 工具注册表
//!
//! 工具集合是封闭的（ToolKind），每种工具实现 Tool trait（描述、参数 Schema、异步调用），
//! 由 ToolRegistry 按 ToolKind 注册与查找，并导出给模型的工具声明。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::AgentState;
use crate::core::AgentError;
use crate::durable::StepRunner;
use crate::llm::ToolDefinition;
use crate::sandbox::SandboxRef;

/// 可用工具种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    RunShellCommand,
    WriteFiles,
    ReadFiles,
    CloneTemplate,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::RunShellCommand,
        ToolKind::WriteFiles,
        ToolKind::ReadFiles,
        ToolKind::CloneTemplate,
    ];

    /// 暴露给模型的工具名
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::RunShellCommand => "run_shell_command",
            ToolKind::WriteFiles => "write_files",
            ToolKind::ReadFiles => "read_files",
            ToolKind::CloneTemplate => "clone_template",
        }
    }

    /// 对应的持久化步骤名
    pub fn step_name(self) -> &'static str {
        match self {
            ToolKind::RunShellCommand => "run-shell-command",
            ToolKind::WriteFiles => "write-files",
            ToolKind::ReadFiles => "read-files",
            ToolKind::CloneTemplate => "clone-template",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// 工具调用时可用的运行上下文：步骤执行器、沙箱引用、共享状态（独占借用）
pub struct ToolContext<'a> {
    pub runner: &'a StepRunner,
    pub sandbox: &'a SandboxRef,
    pub state: &'a mut AgentState,
    /// run_shell_command 的单条命令超时
    pub command_timeout: Duration,
}

/// 工具 trait
///
/// 工具自身的失败（参数非法、沙箱断连、命令超时、非零退出）一律以文本返回给模型；
/// 只有步骤日志层面的错误（错序、重复、日志写入失败）才以 Err 向上传播并终止本次执行。
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value;

    async fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String, AgentError>;
}

/// 工具注册表：按 ToolKind 存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.kind(), Arc::new(tool));
    }

    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.get(&kind).cloned()
    }

    /// 按模型给出的工具名查找；未知名或未注册均返回 None
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Tool>> {
        ToolKind::from_name(name).and_then(|k| self.get(k))
    }

    /// 已注册工具名，按 ToolKind 声明顺序
    pub fn tool_names(&self) -> Vec<&'static str> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| self.tools.contains_key(k))
            .map(ToolKind::name)
            .collect()
    }

    /// 导出给模型的工具声明（顺序稳定，保证重放时请求一致）
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL
            .into_iter()
            .filter_map(|k| self.tools.get(&k))
            .map(|tool| ToolDefinition {
                name: tool.kind().name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}
