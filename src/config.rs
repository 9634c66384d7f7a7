//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VIBE__*` 覆盖（双下划线表示嵌套，如 `VIBE__LLM__PROVIDER=mock`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub sandbox: SandboxSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub workflow: WorkflowSection,
}

/// [app] 段：数据目录与上下文轮数
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// SQLite 文件（历史、步骤日志）所在目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 每次运行加载的历史轮数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_history_limit() -> usize {
    crate::memory::DEFAULT_HISTORY_LIMIT
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次模型请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [sandbox] 段：本地沙箱根目录、模板、端口与超时
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,
    /// 模板目录：`{templates_dir}/{template}` 会被复制进新沙箱
    pub templates_dir: Option<PathBuf>,
    #[serde(default = "default_template")]
    pub template: String,
    /// 对外暴露的开发服务器端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 每次获取句柄时续期的空闲超时（秒）
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_host_suffix")]
    pub host_suffix: String,
    /// run_shell_command 单条命令超时（秒）
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
            templates_dir: None,
            template: default_template(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            host_suffix: default_host_suffix(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl SandboxSection {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("sandboxes")
}

fn default_template() -> String {
    "vibe-nextjs".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_host_suffix() -> String {
    "localhost".to_string()
}

fn default_command_timeout_secs() -> u64 {
    crate::sandbox::LONG_TIMEOUT.as_secs()
}

/// [agent] 段：回合与工具轮数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_max_iterations() -> usize {
    crate::agent::DEFAULT_MAX_ITERATIONS
}

fn default_max_tool_rounds() -> usize {
    crate::agent::DEFAULT_MAX_TOOL_ROUNDS
}

/// [tools] 段：可选工具开关
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsSection {
    #[serde(default)]
    pub enable_template_cloner: bool,
}

/// [workflow] 段：失败重试
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    /// 可重试错误的最大重试次数（同一 run_id 续跑）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 入口队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    64
}

/// 从 config 目录加载配置，环境变量 VIBE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VIBE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VIBE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.history_limit, 5);
        assert_eq!(cfg.sandbox.port, 3000);
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.agent.max_tool_rounds, 20);
        assert_eq!(cfg.llm.provider, "mock");
        assert!(!cfg.tools.enable_template_cloner);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vibe.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_iterations = 2\n\n[sandbox]\nport = 8080\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 2);
        assert_eq!(cfg.agent.max_tool_rounds, 20);
        assert_eq!(cfg.sandbox.port, 8080);
        assert_eq!(cfg.sandbox.command_timeout_secs, 60);
    }
}
