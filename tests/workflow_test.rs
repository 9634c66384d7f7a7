//! 工作流端到端测试：本地沙箱 + 脚本 LLM + 内存存储

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vibe::core::RecoveryEngine;
use vibe::durable::MemoryJournal;
use vibe::llm::{LlmResponse, ScriptedLlmClient};
use vibe::memory::{
    HistoryStore, MemoryHistoryStore, Message, NewTurn, Role, ToolCall, TurnKind, TurnRole,
};
use vibe::sandbox::{LocalSandboxProvider, Sandbox, SandboxError, SandboxProvider};
use vibe::workflow::{
    CodeAgentWorkflow, PromptIngress, RunReport, RunRequest, WorkflowDeps, WorkflowSettings,
    WorkflowWorker, FAILURE_MESSAGE, FATAL_MESSAGE,
};

/// 包装本地沙箱：统计 create 次数，并让第 N 次 connect 失败
struct FaultyProvider {
    inner: LocalSandboxProvider,
    creates: AtomicUsize,
    connects: AtomicUsize,
    fail_connect_at: Option<usize>,
}

impl FaultyProvider {
    fn new(root: &std::path::Path, fail_connect_at: Option<usize>) -> Self {
        Self {
            inner: LocalSandboxProvider::new(root),
            creates: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            fail_connect_at,
        }
    }
}

#[async_trait]
impl SandboxProvider for FaultyProvider {
    async fn create(&self, template: &str) -> Result<String, SandboxError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(template).await
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_connect_at == Some(n) {
            return Err(SandboxError::Connection("connection reset".to_string()));
        }
        self.inner.connect(sandbox_id).await
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    llm: Arc<ScriptedLlmClient>,
    provider: Arc<FaultyProvider>,
    history: Arc<MemoryHistoryStore>,
    workflow: Arc<CodeAgentWorkflow>,
}

fn harness(
    script: Vec<Result<LlmResponse, String>>,
    settings: WorkflowSettings,
    fail_connect_at: Option<usize>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(script));
    let provider = Arc::new(FaultyProvider::new(dir.path(), fail_connect_at));
    let history = Arc::new(MemoryHistoryStore::new());
    let workflow = Arc::new(CodeAgentWorkflow::new(
        WorkflowDeps {
            llm: llm.clone(),
            sandbox_provider: provider.clone(),
            history: history.clone(),
            journal: Arc::new(MemoryJournal::new()),
        },
        settings,
    ));
    Harness {
        _dir: dir,
        llm,
        provider,
        history,
        workflow,
    }
}

fn worker(h: &Harness, max_retries: u32) -> WorkflowWorker {
    let (_tx, rx) = mpsc::channel(1);
    WorkflowWorker::new(
        h.workflow.clone(),
        h.history.clone(),
        RecoveryEngine::new(max_retries),
        rx,
        CancellationToken::new(),
    )
}

fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

fn write_footer() -> LlmResponse {
    LlmResponse::ToolCalls(vec![call(
        "call_write",
        "write_files",
        serde_json::json!({"files": [{"path": "app/footer.tsx", "content": "export const Footer = () => <footer/>;"}]}),
    )])
}

fn summary(text: &str) -> LlmResponse {
    LlmResponse::Text(format!("Done.\n<task_summary>{text}</task_summary>"))
}

fn tool_results(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect()
}

#[tokio::test]
async fn test_footer_request_produces_result_turn() {
    let h = harness(
        vec![
            Ok(write_footer()),
            Ok(summary("Added a footer component.")),
            Ok(LlmResponse::Text("Footer".to_string())),
            Ok(LlmResponse::Text("Added a footer to your app.".to_string())),
        ],
        WorkflowSettings::default(),
        None,
    );

    let result = h
        .workflow
        .run(&RunRequest::new("c1", "add a footer"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.summary, "Added a footer component.");
    assert_eq!(result.title, "Footer");
    assert!(result.files.contains_key("app/footer.tsx"));
    assert!(result.url.starts_with("https://3000-sbx_"));

    let turns = h.history.all_turns("c1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].kind, TurnKind::Result);
    assert_eq!(turns[0].content, "Added a footer to your app.");
    let artifact = turns[0].artifact.as_ref().unwrap();
    assert_eq!(artifact.title, "Footer");
    assert!(artifact.files.contains_key("app/footer.tsx"));
}

#[tokio::test]
async fn test_missing_summary_stops_at_max_iterations() {
    // 模型每回合都只回复空文本，从不给出完成标记
    let h = harness(vec![], WorkflowSettings::default(), None);

    let result = h
        .workflow
        .run(&RunRequest::new("c1", "add a footer"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.files.is_empty());
    assert_eq!(h.llm.tool_call_requests(), 5);
    // 没有 summary 时不会请求标题与回复
    assert_eq!(h.llm.requests().len(), 5);

    let turns = h.history.all_turns("c1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].kind, TurnKind::Error);
    assert_eq!(turns[0].content, FAILURE_MESSAGE);
    assert!(turns[0].artifact.is_none());
}

#[tokio::test]
async fn test_shell_timeout_is_reported_to_model() {
    let settings = WorkflowSettings {
        command_timeout: Duration::from_millis(500),
        ..WorkflowSettings::default()
    };
    let h = harness(
        vec![
            Ok(LlmResponse::ToolCalls(vec![call(
                "call_sh",
                "run_shell_command",
                serde_json::json!({"command": "echo started; sleep 5"}),
            )])),
            Ok(write_footer()),
            Ok(summary("Added a footer after a slow install.")),
        ],
        settings,
        None,
    );

    let result = h
        .workflow
        .run(&RunRequest::new("c1", "add a footer"))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.title, "Fragment");

    let requests = h.llm.requests();
    let second = tool_results(&requests[1].messages);
    assert_eq!(second.len(), 1);
    assert!(second[0].starts_with("Command failed: Command timed out"));
    assert!(second[0].contains("stdout: started"));
}

#[tokio::test]
async fn test_context_is_most_recent_five_turns_in_order() {
    let h = harness(
        vec![Ok(write_footer()), Ok(summary("Footer."))],
        WorkflowSettings::default(),
        None,
    );
    for i in 0..6 {
        let turn = if i % 2 == 0 {
            NewTurn::user("c1", format!("turn {i}"))
        } else {
            NewTurn::assistant("c1", format!("turn {i}"), TurnKind::Result)
        };
        h.history.create_turn(turn).await.unwrap();
    }

    let (ingress, mut rx) = PromptIngress::channel(h.history.clone(), 4);
    let ack = ingress.submit("c1", "now add a footer").await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request.run_id, ack.run_id);
    h.workflow.run(&request).await.unwrap();

    let first = &h.llm.requests()[0];
    let contents: Vec<&str> = first.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["turn 1", "turn 2", "turn 3", "turn 4", "turn 5", "now add a footer"]
    );
    assert_eq!(first.messages[0].role, Role::Assistant);
    assert_eq!(first.messages[5].role, Role::User);
}

#[tokio::test]
async fn test_retry_resumes_without_repeating_side_effects() {
    // 第 2 次 connect（get-sandbox-url）断开，续跑时前面的步骤全部回放
    let h = harness(
        vec![
            Ok(write_footer()),
            Ok(summary("Added a footer.")),
            Ok(LlmResponse::Text("Footer".to_string())),
            Ok(LlmResponse::Text("Done".to_string())),
        ],
        WorkflowSettings::default(),
        Some(2),
    );

    let report = worker(&h, 3)
        .process(RunRequest::new("c1", "add a footer"))
        .await;

    match report {
        RunReport::Completed {
            attempts, result, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(result.success);
            assert_eq!(result.title, "Footer");
        }
        other => panic!("unexpected report: {other:?}"),
    }
    assert_eq!(h.provider.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.llm.requests().len(), 4);
    assert_eq!(h.history.all_turns("c1").await.len(), 1);
}

#[tokio::test]
async fn test_llm_failure_resumes_same_run() {
    let h = harness(
        vec![
            Err("503 service unavailable".to_string()),
            Ok(write_footer()),
            Ok(summary("Added a footer.")),
        ],
        WorkflowSettings::default(),
        None,
    );

    let report = worker(&h, 3)
        .process(RunRequest::new("c1", "add a footer"))
        .await;

    assert!(matches!(report, RunReport::Completed { attempts: 2, .. }));
    assert_eq!(h.provider.creates.load(Ordering::SeqCst), 1);
    let turns = h.history.all_turns("c1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].kind, TurnKind::Result);
}

#[tokio::test]
async fn test_exhausted_retries_persist_fallback_turn() {
    let h = harness(
        vec![Err("down".to_string()), Err("down".to_string())],
        WorkflowSettings::default(),
        None,
    );

    let report = worker(&h, 1)
        .process(RunRequest::new("c1", "add a footer"))
        .await;

    match report {
        RunReport::Failed {
            attempts, turn_id, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(turn_id.is_some());
        }
        other => panic!("unexpected report: {other:?}"),
    }
    let turns = h.history.all_turns("c1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, TurnRole::Assistant);
    assert_eq!(turns[0].kind, TurnKind::Error);
    assert_eq!(turns[0].content, FATAL_MESSAGE);
}

#[tokio::test]
async fn test_worker_processes_submitted_prompts() {
    let h = harness(
        vec![Ok(write_footer()), Ok(summary("Footer."))],
        WorkflowSettings::default(),
        None,
    );
    let (ingress, rx) = PromptIngress::channel(h.history.clone(), 4);
    let cancel = CancellationToken::new();
    let (report_tx, mut reports) = mpsc::unbounded_channel();
    let worker = WorkflowWorker::new(
        h.workflow.clone(),
        h.history.clone(),
        RecoveryEngine::default(),
        rx,
        cancel.clone(),
    )
    .with_reports(report_tx);
    let handle = tokio::spawn(worker.run());

    let ack = ingress.submit("c1", "add a footer").await.unwrap();
    let report = reports.recv().await.unwrap();
    assert_eq!(report.run_id(), ack.run_id);
    assert!(matches!(report, RunReport::Completed { .. }));

    cancel.cancel();
    handle.await.unwrap();

    let turns = h.history.all_turns("c1").await;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[1].kind, TurnKind::Result);
}

#[tokio::test]
async fn test_title_failure_retries_with_fresh_call() {
    let h = harness(
        vec![
            Ok(write_footer()),
            Ok(summary("Added a footer.")),
            Err("503 title".to_string()),
            Ok(LlmResponse::Text("Footer".to_string())),
            Ok(LlmResponse::Text("Added a footer to your app.".to_string())),
        ],
        WorkflowSettings::default(),
        None,
    );

    let report = worker(&h, 3)
        .process(RunRequest::new("c1", "add a footer"))
        .await;

    match report {
        RunReport::Completed {
            attempts, result, ..
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(result.title, "Footer");
        }
        other => panic!("unexpected report: {other:?}"),
    }
    // 重试只重新发出标题请求，推理步骤全部回放
    assert_eq!(h.llm.tool_call_requests(), 2);
    let turns = h.history.all_turns("c1").await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].artifact.as_ref().unwrap().title, "Footer");
}

#[tokio::test]
async fn test_second_run_sees_first_run_turns() {
    let h = harness(
        vec![
            Ok(write_footer()),
            Ok(summary("Added a footer.")),
            Ok(LlmResponse::Text("Footer".to_string())),
            Ok(LlmResponse::Text("Added a footer to your app.".to_string())),
            Ok(summary("Made the footer blue.")),
        ],
        WorkflowSettings::default(),
        None,
    );
    let (ingress, mut rx) = PromptIngress::channel(h.history.clone(), 4);

    ingress.submit("c1", "add a footer").await.unwrap();
    let first = rx.recv().await.unwrap();
    h.workflow.run(&first).await.unwrap();
    let first_requests = h.llm.requests().len();

    ingress.submit("c1", "make it blue").await.unwrap();
    let second = rx.recv().await.unwrap();
    h.workflow.run(&second).await.unwrap();

    let requests = h.llm.requests();
    let seeded = &requests[first_requests].messages;
    let contents: Vec<(Role, &str)> = seeded
        .iter()
        .map(|m| (m.role.clone(), m.content.as_str()))
        .collect();
    assert_eq!(
        contents,
        vec![
            (Role::User, "add a footer"),
            (Role::Assistant, "Added a footer to your app."),
            (Role::User, "make it blue"),
        ]
    );
    assert_eq!(h.history.all_turns("c1").await.len(), 4);
}
