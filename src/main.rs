//! Vibe 命令行入口
//!
//! 用法：`vibe [--config <file>] [--conversation <id>] <prompt...>`
//! 提交一次请求，等待 worker 完成后打印持久化的助手轮。

use std::path::PathBuf;

use anyhow::{bail, Context};
use vibe::config::load_config;
use vibe::core::RuntimeBuilder;
use vibe::memory::TurnRole;
use vibe::workflow::RunReport;

struct CliArgs {
    config: Option<PathBuf>,
    conversation: String,
    prompt: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut conversation = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--conversation" => {
                conversation = Some(args.next().context("--conversation needs an id")?)
            }
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!("usage: vibe [--config <file>] [--conversation <id>] <prompt...>");
    }
    Ok(CliArgs {
        config,
        conversation: conversation
            .unwrap_or_else(|| format!("conv_{}", uuid::Uuid::new_v4().simple())),
        prompt: words.join(" "),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vibe::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config).context("Failed to load config")?;
    let mut runtime = RuntimeBuilder::new(cfg)
        .build()
        .context("Failed to build runtime")?;

    let worker = tokio::spawn(runtime.worker.run());

    let ack = runtime
        .ingress
        .submit(&args.conversation, &args.prompt)
        .await
        .context("Failed to submit prompt")?;
    println!("run {} accepted (conversation {})", ack.run_id, ack.conversation_id);

    while let Some(report) = runtime.reports.recv().await {
        if report.run_id() != ack.run_id {
            continue;
        }
        match &report {
            RunReport::Completed { result, attempts, .. } => {
                println!(
                    "run finished after {attempts} attempt(s): success={} title={:?} url={}",
                    result.success, result.title, result.url
                );
                for path in result.files.keys() {
                    println!("  {path}");
                }
            }
            RunReport::Failed { error, attempts, .. } => {
                println!("run failed after {attempts} attempt(s): {error}");
            }
        }
        break;
    }

    let turns = runtime
        .history
        .list_recent_turns(&ack.conversation_id, 1)
        .await
        .context("Failed to read history")?;
    if let Some(turn) = turns.first().filter(|t| t.role == TurnRole::Assistant) {
        println!("[{}] {}", turn.kind.as_str(), turn.content);
    }

    runtime.cancel.cancel();
    worker.await.context("worker task panicked")?;
    Ok(())
}
