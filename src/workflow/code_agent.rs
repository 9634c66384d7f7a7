//! 代码生成工作流
//!
//! 步骤顺序：get-sandbox-id -> get-previous-messages -> Agent 网络（agent-inference 与各工具步骤）
//! -> generate-title / generate-response -> get-sandbox-url -> save-result。
//! 所有副作用都经过 StepRunner，同一 run_id 重试时已完成步骤直接回放。

use std::sync::Arc;
use std::time::Duration;

use crate::agent::prompts::{
    CODE_AGENT_PROMPT, DEFAULT_RESPONSE, DEFAULT_TITLE, FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT,
};
use crate::agent::{AgentState, CodeAgent, Network};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::durable::{StepJournal, StepRunner};
use crate::llm::{LlmClient, LlmResponse};
use crate::memory::{load_prior_context, ContextTurn, HistoryStore, Message};
use crate::sandbox::{SandboxProvider, SandboxRef};
use crate::tools::{default_registry, ToolContext, ToolExecutor};
use crate::workflow::result::{build_turn, classify, Classification, WorkflowResult};
use crate::workflow::RunRequest;

/// 工作流依赖的外部服务
#[derive(Clone)]
pub struct WorkflowDeps {
    pub llm: Arc<dyn LlmClient>,
    pub sandbox_provider: Arc<dyn SandboxProvider>,
    pub history: Arc<dyn HistoryStore>,
    pub journal: Arc<dyn StepJournal>,
}

/// 工作流参数
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub template: String,
    pub port: u16,
    pub idle_timeout: Duration,
    pub command_timeout: Duration,
    pub history_limit: usize,
    pub max_iterations: usize,
    pub max_tool_rounds: usize,
    pub enable_template_cloner: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for WorkflowSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            template: cfg.sandbox.template.clone(),
            port: cfg.sandbox.port,
            idle_timeout: cfg.sandbox.idle_timeout(),
            command_timeout: cfg.sandbox.command_timeout(),
            history_limit: cfg.app.history_limit,
            max_iterations: cfg.agent.max_iterations,
            max_tool_rounds: cfg.agent.max_tool_rounds,
            enable_template_cloner: cfg.tools.enable_template_cloner,
        }
    }
}

pub struct CodeAgentWorkflow {
    deps: WorkflowDeps,
    settings: WorkflowSettings,
    network: Network,
}

/// 单次文本生成；summary 为空或模型返回空文本时用回退值，模型报错则步骤失败（交给 worker 续跑）
async fn generate_text(
    llm: &dyn LlmClient,
    system: &str,
    summary: &str,
    fallback: &str,
) -> Result<String, AgentError> {
    if summary.is_empty() {
        return Ok(fallback.to_string());
    }
    match llm
        .complete(system, &[Message::user(summary)], &[])
        .await
        .map_err(AgentError::LlmError)?
    {
        LlmResponse::Text(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Ok(fallback.to_string()),
    }
}

impl CodeAgentWorkflow {
    pub fn new(deps: WorkflowDeps, settings: WorkflowSettings) -> Self {
        let executor = ToolExecutor::new(default_registry(settings.enable_template_cloner));
        let agent = CodeAgent::new(CODE_AGENT_PROMPT, executor, deps.llm.clone())
            .with_max_tool_rounds(settings.max_tool_rounds);
        let network = Network::new(agent, settings.max_iterations);
        Self {
            deps,
            settings,
            network,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// 执行（或续跑）一次运行
    pub async fn run(&self, request: &RunRequest) -> Result<WorkflowResult, AgentError> {
        let runner = StepRunner::resume(request.run_id.clone(), self.deps.journal.clone()).await?;
        tracing::info!(run_id = %request.run_id, conversation_id = %request.conversation_id, "workflow started");

        let provider = self.deps.sandbox_provider.clone();
        let template = self.settings.template.clone();
        let sandbox_id: String = runner
            .run("get-sandbox-id", || async move {
                provider.create(&template).await.map_err(AgentError::from)
            })
            .await?;
        let sandbox = SandboxRef::new(
            self.deps.sandbox_provider.clone(),
            sandbox_id,
            self.settings.idle_timeout,
        );

        let history: Vec<ContextTurn> = runner
            .run("get-previous-messages", || {
                load_prior_context(
                    self.deps.history.as_ref(),
                    &request.conversation_id,
                    self.settings.history_limit,
                    request.user_turn_id.as_deref(),
                )
            })
            .await?;

        let mut state = AgentState::new();
        let outcome = {
            let mut ctx = ToolContext {
                runner: &runner,
                sandbox: &sandbox,
                state: &mut state,
                command_timeout: self.settings.command_timeout,
            };
            self.network.run(&history, &request.text, &mut ctx).await?
        };

        let llm = self.deps.llm.as_ref();
        let summary = state.summary();
        let title: String = runner
            .run("generate-title", || {
                generate_text(llm, FRAGMENT_TITLE_PROMPT, summary, DEFAULT_TITLE)
            })
            .await?;
        let response: String = runner
            .run("generate-response", || {
                generate_text(llm, RESPONSE_PROMPT, summary, DEFAULT_RESPONSE)
            })
            .await?;

        let port = self.settings.port;
        let sandbox_ref = &sandbox;
        let url: String = runner
            .run("get-sandbox-url", || async move {
                let handle = sandbox_ref.acquire().await?;
                Ok::<_, AgentError>(format!("https://{}", handle.public_host(port)))
            })
            .await?;

        let classification = classify(&state);
        let new_turn = build_turn(&request.conversation_id, &state, &url, &title, &response);
        let store = self.deps.history.as_ref();
        let turn_id: String = runner
            .run("save-result", || async move {
                store.create_turn(new_turn).await.map(|t| t.id)
            })
            .await?;

        let success = classification == Classification::Success;
        tracing::info!(
            run_id = %request.run_id,
            success,
            iterations = outcome.iterations,
            files = state.files.len(),
            steps = runner.completed_steps(),
            "workflow finished"
        );

        let summary = state.summary().to_string();
        Ok(WorkflowResult {
            url,
            title,
            files: state.files,
            summary,
            success,
            turn_id,
        })
    }
}
