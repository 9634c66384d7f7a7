//! clone_template：从 GitHub 克隆项目模板并启动开发服务器
//!
//! 流程：git clone（失败则下载归档解压）-> npm install（失败仅记录）-> 后台启动 dev server。
//! 每条命令都有独立超时，所有失败都以文本返回。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::sandbox::{
    CommandOptions, CommandOutput, Sandbox, SandboxError, SandboxRef, LONG_TIMEOUT,
    PROBE_TIMEOUT, SETUP_TIMEOUT,
};
use crate::tools::schema::{parameters_for, parse_args, CloneTemplateArgs};
use crate::tools::{Tool, ToolContext, ToolKind};

const DEFAULT_PROJECT_NAME: &str = "vibe-project";
const GITHUB_PREFIX: &str = "https://github.com/";
/// 返回给模型的安装日志最多保留的字符数（取末尾）
const LOG_TAIL_CHARS: usize = 1000;

pub struct CloneTemplateTool;

/// 仅接受 `https://github.com/<owner>/<repo>[.git]`，且只含安全字符（会拼进 shell 命令）
fn repo_path(github_url: &str) -> Option<String> {
    let rest = github_url.trim().strip_prefix(GITHUB_PREFIX)?;
    let path = rest.trim_end_matches('/').trim_end_matches(".git");
    let safe = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    let segments: Vec<&str> = path.split('/').collect();
    if !safe || segments.len() != 2 || segments.iter().any(|s| s.is_empty() || *s == "..") {
        return None;
    }
    Some(path.to_string())
}

fn tail(log: &str) -> String {
    let count = log.chars().count();
    log.chars().skip(count.saturating_sub(LOG_TAIL_CHARS)).collect()
}

fn succeeded(result: &Result<CommandOutput, SandboxError>) -> bool {
    matches!(result, Ok(out) if out.exit_code == 0)
}

/// 执行一条命令，按标签把流式输出追加进日志
async fn run_logged(
    sandbox: &dyn Sandbox,
    label: &str,
    command: &str,
    timeout: std::time::Duration,
    log: &mut String,
) -> Result<CommandOutput, SandboxError> {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let result = {
        let mut on_out = |line: &str| stdout.push_str(line);
        let mut on_err = |line: &str| stderr.push_str(line);
        let options = CommandOptions::with_timeout(timeout)
            .on_stdout(&mut on_out)
            .on_stderr(&mut on_err);
        sandbox.run_command(command, options).await
    };

    for line in stdout.lines() {
        log.push_str(&format!("{label}: {line}\n"));
    }
    for line in stderr.lines() {
        log.push_str(&format!("{label} ERROR: {line}\n"));
    }
    match &result {
        Ok(out) if out.exit_code != 0 => {
            log.push_str(&format!("{label} exit code: {}\n", out.exit_code));
        }
        Err(e) => log.push_str(&format!("{label} failed: {e}\n")),
        _ => {}
    }
    result
}

async fn clone_and_setup(sandbox: &SandboxRef, github_url: &str, repo: &str, project: &str) -> String {
    let handle = match sandbox.acquire().await {
        Ok(h) => h,
        Err(e) => {
            return format!("Error: failed to get sandbox: {e}. Cannot proceed with cloning {github_url}")
        }
    };
    let handle = handle.as_ref();
    let mut log = String::new();

    let clone = run_logged(
        handle,
        "CLONE",
        &format!("cd \"$HOME\" && rm -rf repo && git clone --depth 1 {GITHUB_PREFIX}{repo}.git repo"),
        LONG_TIMEOUT,
        &mut log,
    )
    .await;

    if !succeeded(&clone) {
        tracing::info!(repo = %repo, "git clone failed, falling back to archive download");
        let download = run_logged(
            handle,
            "DOWNLOAD",
            &format!(
                "cd \"$HOME\" && rm -rf repo repo.zip && curl -fsSL {GITHUB_PREFIX}{repo}/archive/main.zip -o repo.zip && unzip -q repo.zip && (mv *-main repo || mv *-master repo)"
            ),
            LONG_TIMEOUT,
            &mut log,
        )
        .await;
        if !succeeded(&download) {
            return format!(
                "Error: both git clone and archive download failed for {github_url}\n{}",
                tail(&log)
            );
        }
    }

    let install = run_logged(
        handle,
        "INSTALL",
        "cd \"$HOME/repo\" && npm install --prefer-offline --no-audit --no-fund",
        SETUP_TIMEOUT,
        &mut log,
    )
    .await;
    if !succeeded(&install) {
        log.push_str("npm install had issues, continuing\n");
    }

    let server = run_logged(
        handle,
        "SERVER",
        "cd \"$HOME/repo\" && (npm run dev > /tmp/server.log 2>&1 &) && echo \"Server started in background\"",
        PROBE_TIMEOUT,
        &mut log,
    )
    .await;

    setup_report(
        github_url,
        project,
        succeeded(&install),
        succeeded(&server),
        &log,
    )
}

/// 克隆成功后的汇总文本；安装与启动两行按各自命令的结果生成
fn setup_report(
    github_url: &str,
    project: &str,
    installed: bool,
    server_started: bool,
    log: &str,
) -> String {
    let install_line = if installed {
        "Dependencies installed"
    } else {
        "Dependency installation failed (see setup details)"
    };
    let server_line = if server_started {
        "Development server started in background"
    } else {
        "Development server failed to start (see setup details)"
    };
    format!(
        "Successfully cloned template {github_url} for project {project}.\n\
         - Repository cloned to /home/user/repo\n\
         - {install_line}\n\
         - {server_line}\n\
         Setup details:\n{}",
        tail(log)
    )
}

#[async_trait]
impl Tool for CloneTemplateTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CloneTemplate
    }

    fn description(&self) -> &str {
        "Clone a project template from a GitHub repository URL into /home/user/repo, install its dependencies and start its dev server."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CloneTemplateArgs>()
    }

    async fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String, AgentError> {
        let args: CloneTemplateArgs = match parse_args(self.kind().name(), args) {
            Ok(a) => a,
            Err(text) => return Ok(text),
        };
        let Some(repo) = repo_path(&args.github_url) else {
            return Ok(format!(
                "Error: invalid GitHub URL: {:?}. Please provide a valid https://github.com/<owner>/<repo> URL.",
                args.github_url
            ));
        };
        let project = args
            .project_name
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string());

        let sandbox = ctx.sandbox;
        let github_url = args.github_url;
        ctx.runner
            .run(self.kind().step_name(), || async move {
                Ok(clone_and_setup(sandbox, &github_url, &repo, &project).await)
            })
            .await
    }
}
