//! write_files / read_files：沙箱文件读写
//!
//! 写入按顺序逐个执行，全部成功才合并进 AgentState.files；合并发生在步骤之外，
//! 续跑回放步骤结果时状态同样会被重建。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::sandbox::{normalize_path, SandboxError, SandboxRef};
use crate::tools::schema::{parameters_for, parse_args, FileEntry, ReadFilesArgs, WriteFilesArgs};
use crate::tools::{Tool, ToolContext, ToolKind};

pub struct WriteFilesTool;

pub struct ReadFilesTool;

async fn write_all(
    sandbox: &SandboxRef,
    files: &[FileEntry],
) -> Result<BTreeMap<String, String>, SandboxError> {
    let handle = sandbox.acquire().await?;
    let mut written = BTreeMap::new();
    for file in files {
        handle.write_file(&file.path, &file.content).await?;
        written.insert(normalize_path(&file.path), file.content.clone());
    }
    Ok(written)
}

async fn read_all(sandbox: &SandboxRef, paths: &[String]) -> Result<Vec<FileEntry>, SandboxError> {
    let handle = sandbox.acquire().await?;
    let mut contents = Vec::with_capacity(paths.len());
    for path in paths {
        let content = handle.read_file(path).await?;
        contents.push(FileEntry {
            path: path.clone(),
            content,
        });
    }
    Ok(contents)
}

#[async_trait]
impl Tool for WriteFilesTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WriteFiles
    }

    fn description(&self) -> &str {
        "Create or update files in the sandbox. Paths are relative to /home/user (e.g. app/page.tsx)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<WriteFilesArgs>()
    }

    async fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String, AgentError> {
        let name = self.kind().name();
        let args: WriteFilesArgs = match parse_args(name, args) {
            Ok(a) => a,
            Err(text) => return Ok(text),
        };
        if args.files.is_empty() {
            return Ok(format!("Invalid arguments for {name}: files must not be empty"));
        }
        if let Some(bad) = args.files.iter().find(|f| f.path.trim().is_empty()) {
            return Ok(format!(
                "Invalid arguments for {name}: empty path (content length {})",
                bad.content.len()
            ));
        }

        let sandbox = ctx.sandbox;
        let outcome: Result<BTreeMap<String, String>, String> = ctx
            .runner
            .run(self.kind().step_name(), || async move {
                Ok(write_all(sandbox, &args.files)
                    .await
                    .map_err(|e| e.to_string()))
            })
            .await?;

        match outcome {
            Ok(written) => {
                let paths: Vec<String> = written.keys().cloned().collect();
                ctx.state.merge_files(written);
                Ok(format!(
                    "Successfully wrote {} file(s): {}",
                    paths.len(),
                    paths.join(", ")
                ))
            }
            Err(e) => Ok(format!("Error: {e}")),
        }
    }
}

#[async_trait]
impl Tool for ReadFilesTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ReadFiles
    }

    fn description(&self) -> &str {
        "Read files from the sandbox. Returns a JSON array of {path, content}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ReadFilesArgs>()
    }

    async fn call(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String, AgentError> {
        let name = self.kind().name();
        let args: ReadFilesArgs = match parse_args(name, args) {
            Ok(a) => a,
            Err(text) => return Ok(text),
        };
        if args.files.is_empty() {
            return Ok(format!("Invalid arguments for {name}: files must not be empty"));
        }

        let sandbox = ctx.sandbox;
        ctx.runner
            .run(self.kind().step_name(), || async move {
                let text = match read_all(sandbox, &args.files).await {
                    Ok(contents) => serde_json::to_string(&contents)?,
                    Err(e) => format!("Error: {e}"),
                };
                Ok::<_, AgentError>(text)
            })
            .await
    }
}
