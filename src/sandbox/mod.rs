//! 执行沙箱：隔离的远程/本地计算环境
//!
//! SandboxProvider 负责 create / connect；Sandbox 句柄提供命令执行（流式输出 + 超时）、文件读写、
//! 端口暴露。句柄每次（重新）获取都会续期空闲超时，沙箱本身由外部在超时后回收。

pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalSandboxProvider;

/// 环境准备类命令（安装依赖等）超时
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);
/// 较长操作（clone、构建）超时
pub const LONG_TIMEOUT: Duration = Duration::from_secs(60);
/// 快速探测类命令超时
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// 沙箱内用户主目录；绝对路径以此为根映射到沙箱工作目录
pub const SANDBOX_HOME: &str = "/home/user";

/// 去掉 `/home/user` 前缀与开头的 `/`，得到相对沙箱主目录的路径
pub fn relative_path(path: &str) -> &str {
    let rest = match path.strip_prefix(SANDBOX_HOME) {
        Some(r) if r.is_empty() || r.starts_with('/') => r,
        _ => path,
    };
    rest.trim_start_matches('/')
}

/// 文件表的键：同一沙箱文件的不同写法（绝对路径、`./`、重复斜杠）归一为同一个相对路径
pub fn normalize_path(path: &str) -> String {
    relative_path(path)
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Invalid sandbox ID provided: {0:?}")]
    InvalidId(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Sandbox {0} has expired")]
    Expired(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Command error: {0}")]
    Command(String),

    #[error("File error at {path}: {message}")]
    File { path: String, message: String },

    #[error("Path escapes sandbox: {0}")]
    PathEscape(String),
}

/// 命令执行结果；非零退出码不视为 Err，由调用方决定如何呈现
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// 命令执行选项：超时与流式回调（逐行，含换行符）
pub struct CommandOptions<'a> {
    pub timeout: Duration,
    pub on_stdout: Option<&'a mut (dyn FnMut(&str) + Send)>,
    pub on_stderr: Option<&'a mut (dyn FnMut(&str) + Send)>,
}

impl<'a> CommandOptions<'a> {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            on_stdout: None,
            on_stderr: None,
        }
    }

    pub fn on_stdout(mut self, f: &'a mut (dyn FnMut(&str) + Send)) -> Self {
        self.on_stdout = Some(f);
        self
    }

    pub fn on_stderr(mut self, f: &'a mut (dyn FnMut(&str) + Send)) -> Self {
        self.on_stderr = Some(f);
        self
    }
}

/// 单个沙箱句柄
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// 将空闲超时截止时间重置为 now + timeout
    async fn set_idle_timeout(&self, timeout: Duration) -> Result<(), SandboxError>;

    async fn run_command(
        &self,
        command: &str,
        options: CommandOptions<'_>,
    ) -> Result<CommandOutput, SandboxError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    async fn file_exists(&self, path: &str) -> Result<bool, SandboxError>;

    /// 返回对外暴露指定端口的主机名（不含协议）
    fn public_host(&self, port: u16) -> String;
}

/// 沙箱供应服务：模板 ID 由外部配置给定
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, template: &str) -> Result<String, SandboxError>;

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

/// 按 ID 连接沙箱并续期空闲超时；ID 为空或远端不可达时立即报错
pub async fn connect_sandbox(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    idle_timeout: Duration,
) -> Result<Arc<dyn Sandbox>, SandboxError> {
    if sandbox_id.trim().is_empty() {
        return Err(SandboxError::InvalidId(sandbox_id.to_string()));
    }

    let sandbox = provider.connect(sandbox_id).await.map_err(|e| match e {
        SandboxError::InvalidId(_) | SandboxError::Connection(_) => e,
        other => SandboxError::Connection(format!(
            "Failed to connect to sandbox {sandbox_id}: {other}"
        )),
    })?;
    sandbox.set_idle_timeout(idle_timeout).await?;
    tracing::debug!(sandbox_id = %sandbox_id, idle_timeout_secs = idle_timeout.as_secs(), "sandbox acquired");
    Ok(sandbox)
}

/// 一次运行绑定的沙箱引用：工具每次调用时通过它重新获取句柄
#[derive(Clone)]
pub struct SandboxRef {
    provider: Arc<dyn SandboxProvider>,
    sandbox_id: String,
    idle_timeout: Duration,
}

impl SandboxRef {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        sandbox_id: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sandbox_id: sandbox_id.into(),
            idle_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.sandbox_id
    }

    pub async fn acquire(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        connect_sandbox(self.provider.as_ref(), &self.sandbox_id, self.idle_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_aliases_normalize_to_one_key() {
        for alias in [
            "app/page.tsx",
            "/home/user/app/page.tsx",
            "./app/page.tsx",
            "/app//page.tsx",
        ] {
            assert_eq!(normalize_path(alias), "app/page.tsx", "alias {alias}");
        }
        assert_eq!(relative_path("/home/user"), "");
        // 仅前缀相同的目录名不被剥离
        assert_eq!(relative_path("/home/username/a"), "home/username/a");
    }
}
