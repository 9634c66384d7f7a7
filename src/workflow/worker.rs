//! 工作流 worker
//!
//! 从队列取运行请求执行 CodeAgentWorkflow；可重试错误按 RecoveryEngine 以同一 run_id 续跑，
//! 致命错误或重试耗尽时直接写一条兜底错误轮。CancellationToken 触发后在两次运行之间退出。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{RecoveryAction, RecoveryEngine};
use crate::memory::HistoryStore;
use crate::workflow::result::persist_fatal;
use crate::workflow::{CodeAgentWorkflow, RunRequest, WorkflowResult};

/// 一次运行的最终报告
#[derive(Debug, Clone)]
pub enum RunReport {
    Completed {
        run_id: String,
        attempts: u32,
        result: WorkflowResult,
    },
    Failed {
        run_id: String,
        attempts: u32,
        error: String,
        /// 兜底错误轮 ID（写入失败时为 None）
        turn_id: Option<String>,
    },
}

impl RunReport {
    pub fn run_id(&self) -> &str {
        match self {
            RunReport::Completed { run_id, .. } | RunReport::Failed { run_id, .. } => run_id,
        }
    }
}

pub struct WorkflowWorker {
    workflow: Arc<CodeAgentWorkflow>,
    history: Arc<dyn HistoryStore>,
    recovery: RecoveryEngine,
    rx: mpsc::Receiver<RunRequest>,
    cancel: CancellationToken,
    reports: Option<mpsc::UnboundedSender<RunReport>>,
}

impl WorkflowWorker {
    pub fn new(
        workflow: Arc<CodeAgentWorkflow>,
        history: Arc<dyn HistoryStore>,
        recovery: RecoveryEngine,
        rx: mpsc::Receiver<RunRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workflow,
            history,
            recovery,
            rx,
            cancel,
            reports: None,
        }
    }

    /// 每次运行结束后推送报告
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<RunReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// 主循环：直到取消或队列关闭
    pub async fn run(mut self) {
        tracing::info!("workflow worker started");
        loop {
            let request = tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(r) => r,
                    None => break,
                },
            };
            let report = self.process(request).await;
            if let Some(tx) = &self.reports {
                let _ = tx.send(report);
            }
        }
        tracing::info!("workflow worker stopped");
    }

    /// 执行单个请求（含重试）
    pub async fn process(&self, request: RunRequest) -> RunReport {
        let mut attempt: u32 = 1;
        loop {
            match self.workflow.run(&request).await {
                Ok(result) => {
                    return RunReport::Completed {
                        run_id: request.run_id,
                        attempts: attempt,
                        result,
                    };
                }
                Err(e) => match self.recovery.handle(&e, attempt) {
                    RecoveryAction::Retry => {
                        tracing::warn!(run_id = %request.run_id, attempt, error = %e, "workflow failed, resuming");
                        attempt += 1;
                    }
                    RecoveryAction::Abort => {
                        tracing::error!(run_id = %request.run_id, attempt, error = %e, "workflow aborted");
                        let turn_id =
                            match persist_fatal(self.history.as_ref(), &request.conversation_id)
                                .await
                            {
                                Ok(id) => Some(id),
                                Err(store_err) => {
                                    tracing::error!(run_id = %request.run_id, error = %store_err, "failed to persist error turn");
                                    None
                                }
                            };
                        return RunReport::Failed {
                            run_id: request.run_id,
                            attempts: attempt,
                            error: e.to_string(),
                            turn_id,
                        };
                    }
                },
            }
        }
    }
}
