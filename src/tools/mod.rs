//! 工具层：封闭的工具集合（shell、文件读写、模板克隆）、注册表与执行器
//!
//! 每个工具的沙箱操作都包在一个持久化步骤里，续跑时直接回放结果。

pub mod executor;
pub mod files;
pub mod registry;
pub mod schema;
pub mod template;
pub mod terminal;

pub use executor::ToolExecutor;
pub use files::{ReadFilesTool, WriteFilesTool};
pub use registry::{Tool, ToolContext, ToolKind, ToolRegistry};
pub use schema::{CloneTemplateArgs, FileEntry, ReadFilesArgs, RunShellCommandArgs, WriteFilesArgs};
pub use template::CloneTemplateTool;
pub use terminal::RunShellCommandTool;

/// 默认工具集；clone_template 由配置开关控制
pub fn default_registry(enable_template_cloner: bool) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(RunShellCommandTool);
    registry.register(WriteFilesTool);
    registry.register(ReadFilesTool);
    if enable_template_cloner {
        registry.register(CloneTemplateTool);
    }
    registry
}
