//! Vibe - 可恢复的代码生成智能体
//!
//! 模块划分：
//! - **agent**: 代码 Agent（模型 + 工具循环）、多回合路由、共享状态、提示词
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复策略、运行时装配
//! - **durable**: 持久化步骤执行器与步骤日志（内存 / SQLite）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 模型消息、对话历史存储与上下文加载
//! - **observability**: tracing 初始化
//! - **sandbox**: 执行沙箱抽象与本地目录实现
//! - **tools**: 工具集合（shell、文件读写、模板克隆）、注册表与执行器
//! - **workflow**: 代码生成工作流、结果判定与持久化、请求入口与 worker

pub mod agent;
pub mod config;
pub mod core;
pub mod durable;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod sandbox;
pub mod tools;
pub mod workflow;
