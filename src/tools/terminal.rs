//! run_shell_command：在沙箱中执行 shell 命令
//!
//! 输出逐行流入 stdout / stderr 缓冲；非零退出、超时、断连都格式化为失败文本（附已收集的部分输出）。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::sandbox::{CommandOptions, SandboxRef};
use crate::tools::schema::{parameters_for, parse_args, RunShellCommandArgs};
use crate::tools::{Tool, ToolContext, ToolKind};

pub struct RunShellCommandTool;

/// 失败文本：错误原因 + 截至失败时的输出
pub fn command_failure(error: &str, stdout: &str, stderr: &str) -> String {
    format!("Command failed: {error}\nstdout: {stdout}\nstderr: {stderr}")
}

async fn run_in_sandbox(
    sandbox: &SandboxRef,
    command: &str,
    timeout: std::time::Duration,
) -> String {
    let mut stdout = String::new();
    let mut stderr = String::new();

    let result = match sandbox.acquire().await {
        Ok(handle) => {
            let mut on_out = |line: &str| stdout.push_str(line);
            let mut on_err = |line: &str| stderr.push_str(line);
            let options = CommandOptions::with_timeout(timeout)
                .on_stdout(&mut on_out)
                .on_stderr(&mut on_err);
            handle.run_command(command, options).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(output) if output.exit_code == 0 => stdout,
        Ok(output) => {
            command_failure(&format!("exit code {}", output.exit_code), &stdout, &stderr)
        }
        Err(e) => {
            tracing::warn!(sandbox_id = %sandbox.id(), command = %command, error = %e, "shell command failed");
            command_failure(&e.to_string(), &stdout, &stderr)
        }
    }
}

#[async_trait]
impl Tool for RunShellCommandTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RunShellCommand
    }

    fn description(&self) -> &str {
        "Use the terminal to run commands in the sandbox (e.g. install packages with `npm install <pkg> --yes`). Returns stdout, or the error with partial stdout/stderr."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<RunShellCommandArgs>()
    }

    async fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String, AgentError> {
        let name = self.kind().name();
        let args: RunShellCommandArgs = match parse_args(name, args) {
            Ok(a) => a,
            Err(text) => return Ok(text),
        };
        let command = args.command.trim().to_string();
        if command.is_empty() {
            return Ok(format!("Invalid arguments for {name}: command must not be empty"));
        }

        let sandbox = ctx.sandbox;
        let timeout = ctx.command_timeout;
        ctx.runner
            .run(self.kind().step_name(), || async move {
                Ok(run_in_sandbox(sandbox, &command, timeout).await)
            })
            .await
    }
}
