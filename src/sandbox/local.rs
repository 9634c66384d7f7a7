//! 本地沙箱：每个沙箱对应 root 下的一个工作目录
//!
//! 目录布局：`{root}/{id}/` 为沙箱主目录（命令以其为 cwd 与 HOME），`{root}/{id}.json` 记录模板与
//! 空闲截止时间。状态全部落盘，进程重启后可按 ID 重新连接（续跑需要）。

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::sandbox::{
    relative_path, CommandOptions, CommandOutput, Sandbox, SandboxError, SandboxProvider,
};

/// 新建沙箱的默认存活时间（首次 connect 时会被续期）
const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxMeta {
    template: String,
    created_at: i64,
    /// 空闲截止时间（毫秒时间戳）
    expires_at: i64,
}

/// 本地目录沙箱供应者
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    root: PathBuf,
    templates_dir: Option<PathBuf>,
    host_suffix: String,
    initial_timeout: Duration,
}

impl LocalSandboxProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            templates_dir: None,
            host_suffix: "localhost".to_string(),
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
        }
    }

    /// 模板目录：`{templates_dir}/{template}` 存在时，其内容会被复制进新沙箱
    pub fn with_templates_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.templates_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_host_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.host_suffix = suffix.into();
        self
    }

    pub fn with_initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn workdir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn load_meta(path: &Path) -> Result<SandboxMeta, SandboxError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SandboxError::Connection(format!("sandbox metadata unavailable: {e}")))?;
    serde_json::from_str(&data)
        .map_err(|e| SandboxError::Connection(format!("corrupt sandbox metadata: {e}")))
}

async fn store_meta(path: &Path, meta: &SandboxMeta) -> Result<(), SandboxError> {
    let data = serde_json::to_string(meta)
        .map_err(|e| SandboxError::Connection(format!("encode sandbox metadata: {e}")))?;
    tokio::fs::write(path, data)
        .await
        .map_err(|e| SandboxError::Connection(format!("write sandbox metadata: {e}")))
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, template: &str) -> Result<String, SandboxError> {
        let id = format!("sbx_{}", uuid::Uuid::new_v4().simple());
        let workdir = self.workdir(&id);

        let template_src = self
            .templates_dir
            .as_ref()
            .map(|dir| dir.join(template))
            .filter(|p| p.is_dir());
        let dest = workdir.clone();
        tokio::task::spawn_blocking(move || match template_src {
            Some(src) => copy_dir_recursive(&src, &dest),
            None => std::fs::create_dir_all(&dest),
        })
        .await
        .map_err(|e| SandboxError::Connection(e.to_string()))?
        .map_err(|e| SandboxError::Connection(format!("create sandbox dir: {e}")))?;

        let now = now_millis();
        let meta = SandboxMeta {
            template: template.to_string(),
            created_at: now,
            expires_at: now + self.initial_timeout.as_millis() as i64,
        };
        store_meta(&self.meta_path(&id), &meta).await?;

        tracing::info!(sandbox_id = %id, template = %template, "sandbox created");
        Ok(id)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if !valid_id(sandbox_id) {
            return Err(SandboxError::InvalidId(sandbox_id.to_string()));
        }
        let meta_path = self.meta_path(sandbox_id);
        let meta = load_meta(&meta_path).await?;
        if meta.expires_at <= now_millis() {
            return Err(SandboxError::Expired(sandbox_id.to_string()));
        }
        Ok(Arc::new(LocalSandbox {
            id: sandbox_id.to_string(),
            workdir: self.workdir(sandbox_id),
            meta_path,
            host_suffix: self.host_suffix.clone(),
        }))
    }
}

/// 本地沙箱句柄
#[derive(Debug)]
pub struct LocalSandbox {
    id: String,
    workdir: PathBuf,
    meta_path: PathBuf,
    host_suffix: String,
}

impl LocalSandbox {
    async fn ensure_alive(&self) -> Result<(), SandboxError> {
        let meta = load_meta(&self.meta_path).await?;
        if meta.expires_at <= now_millis() {
            return Err(SandboxError::Expired(self.id.clone()));
        }
        Ok(())
    }

    /// 沙箱内路径映射：`/home/user/x` 与 `x` 都指向工作目录下的 x；禁止 `..`
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let rel = relative_path(path);
        let rel_path = Path::new(rel);
        let escapes = rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if rel.is_empty() || escapes {
            return Err(SandboxError::PathEscape(path.to_string()));
        }
        Ok(self.workdir.join(rel_path))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_idle_timeout(&self, timeout: Duration) -> Result<(), SandboxError> {
        let mut meta = load_meta(&self.meta_path).await?;
        let now = now_millis();
        if meta.expires_at <= now {
            return Err(SandboxError::Expired(self.id.clone()));
        }
        meta.expires_at = now + timeout.as_millis() as i64;
        store_meta(&self.meta_path, &meta).await
    }

    async fn run_command(
        &self,
        command: &str,
        options: CommandOptions<'_>,
    ) -> Result<CommandOutput, SandboxError> {
        self.ensure_alive().await?;

        let CommandOptions {
            timeout,
            mut on_stdout,
            mut on_stderr,
        } = options;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .env("HOME", &self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Command(format!("spawn failed: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Command("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Command("stderr not captured".to_string()))?;
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let mut out_buf = String::new();
        let mut err_buf = String::new();

        let pump = async {
            let mut out_done = false;
            let mut err_done = false;
            while !(out_done && err_done) {
                tokio::select! {
                    line = out_lines.next_line(), if !out_done => match line {
                        Ok(Some(l)) => {
                            let chunk = format!("{l}\n");
                            if let Some(cb) = on_stdout.as_deref_mut() {
                                cb(&chunk);
                            }
                            out_buf.push_str(&chunk);
                        }
                        Ok(None) => out_done = true,
                        Err(e) => return Err(SandboxError::Command(e.to_string())),
                    },
                    line = err_lines.next_line(), if !err_done => match line {
                        Ok(Some(l)) => {
                            let chunk = format!("{l}\n");
                            if let Some(cb) = on_stderr.as_deref_mut() {
                                cb(&chunk);
                            }
                            err_buf.push_str(&chunk);
                        }
                        Ok(None) => err_done = true,
                        Err(e) => return Err(SandboxError::Command(e.to_string())),
                    },
                }
            }
            child
                .wait()
                .await
                .map_err(|e| SandboxError::Command(e.to_string()))
        };

        let outcome = tokio::time::timeout(timeout, pump).await;
        let status = match outcome {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.start_kill();
                tracing::warn!(sandbox_id = %self.id, command = %command, timeout_ms = timeout.as_millis() as u64, "sandbox command timed out");
                return Err(SandboxError::Timeout(timeout));
            }
        };

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: out_buf,
            stderr: err_buf,
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_alive().await?;
        let target = self.resolve(path)?;
        let file_err = |e: std::io::Error| SandboxError::File {
            path: path.to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(file_err)?;
        }
        tokio::fs::write(&target, content).await.map_err(file_err)
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_alive().await?;
        let target = self.resolve(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| SandboxError::File {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn file_exists(&self, path: &str) -> Result<bool, SandboxError> {
        self.ensure_alive().await?;
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await.unwrap_or(false))
    }

    fn public_host(&self, port: u16) -> String {
        format!("{port}-{}.{}", self.id, self.host_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{connect_sandbox, PROBE_TIMEOUT};

    async fn provider_with_sandbox() -> (tempfile::TempDir, LocalSandboxProvider, String) {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalSandboxProvider::new(dir.path());
        let id = provider.create("nextjs").await.unwrap();
        (dir, provider, id)
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_id() {
        let (_dir, provider, _) = provider_with_sandbox().await;
        let err = connect_sandbox(&provider, "  ", Duration::from_secs(60))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::InvalidId(_)));
    }

    #[tokio::test]
    async fn test_connect_unknown_id_is_connection_error() {
        let (_dir, provider, _) = provider_with_sandbox().await;
        let err = connect_sandbox(&provider, "sbx_missing", Duration::from_secs(60))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::Connection(_)));
    }

    #[tokio::test]
    async fn test_expired_sandbox_cannot_be_connected() {
        let dir = tempfile::tempdir().unwrap();
        let provider =
            LocalSandboxProvider::new(dir.path()).with_initial_timeout(Duration::from_millis(0));
        let id = provider.create("nextjs").await.unwrap();
        let err = connect_sandbox(&provider, &id, Duration::from_secs(60))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::Connection(_)));
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (_dir, provider, id) = provider_with_sandbox().await;
        let sandbox = connect_sandbox(&provider, &id, Duration::from_secs(60))
            .await
            .unwrap();
        sandbox
            .write_file("/home/user/app/page.tsx", "export default 1")
            .await
            .unwrap();
        assert_eq!(
            sandbox.read_file("app/page.tsx").await.unwrap(),
            "export default 1"
        );
        assert!(sandbox.file_exists("app/page.tsx").await.unwrap());
        assert!(!sandbox.file_exists("app/missing.tsx").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let (_dir, provider, id) = provider_with_sandbox().await;
        let sandbox = provider.connect(&id).await.unwrap();
        let err = sandbox.write_file("../outside.txt", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::PathEscape(_)));
    }

    #[tokio::test]
    async fn test_run_command_streams_output() {
        let (_dir, provider, id) = provider_with_sandbox().await;
        let sandbox = provider.connect(&id).await.unwrap();
        let mut seen = Vec::new();
        let mut on_out = |s: &str| seen.push(s.to_string());
        let output = sandbox
            .run_command(
                "echo one; echo two; echo oops 1>&2; exit 3",
                CommandOptions::with_timeout(PROBE_TIMEOUT).on_stdout(&mut on_out),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "one\ntwo\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(seen, vec!["one\n".to_string(), "two\n".to_string()]);
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let (_dir, provider, id) = provider_with_sandbox().await;
        let sandbox = provider.connect(&id).await.unwrap();
        let err = sandbox
            .run_command(
                "sleep 5",
                CommandOptions::with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, SandboxError::Timeout(Duration::from_millis(200)));
        assert_eq!(err.to_string(), "Command timed out after 200ms");
    }

    #[tokio::test]
    async fn test_template_contents_copied() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(templates.join("nextjs/app")).unwrap();
        std::fs::write(templates.join("nextjs/app/page.tsx"), "hello").unwrap();
        let provider = LocalSandboxProvider::new(dir.path().join("sandboxes"))
            .with_templates_dir(&templates);
        let id = provider.create("nextjs").await.unwrap();
        let sandbox = provider.connect(&id).await.unwrap();
        assert_eq!(sandbox.read_file("app/page.tsx").await.unwrap(), "hello");
        assert_eq!(sandbox.public_host(3000), format!("3000-{id}.localhost"));
    }
}
