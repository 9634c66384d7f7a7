//! 运行时构建器：按配置装配 LLM、沙箱供应者、SQLite 存储、工作流、请求入口与 worker

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::durable::{SqliteJournal, StepJournal};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{HistoryStore, SqliteHistoryStore};
use crate::sandbox::{LocalSandboxProvider, SandboxProvider};
use crate::workflow::{
    CodeAgentWorkflow, PromptIngress, RunReport, WorkflowDeps, WorkflowSettings, WorkflowWorker,
};

/// 按 provider 选择 LLM 后端；openai 需要 API Key（配置或 OPENAI_API_KEY），否则回退到 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = cfg
        .llm
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_request_timeout(std::time::Duration::from_secs(cfg.llm.timeouts.request)),
            )
        }
        ("openai", None) => {
            tracing::warn!("provider=openai but no API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
        _ => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 装配完成的运行时组件
pub struct Runtime {
    pub ingress: PromptIngress,
    pub worker: WorkflowWorker,
    pub history: Arc<dyn HistoryStore>,
    pub cancel: CancellationToken,
    pub reports: mpsc::UnboundedReceiver<RunReport>,
}

/// 运行时构建器：默认从配置创建全部依赖，测试可替换单个依赖
pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    sandbox_provider: Option<Arc<dyn SandboxProvider>>,
    history: Option<Arc<dyn HistoryStore>>,
    journal: Option<Arc<dyn StepJournal>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            sandbox_provider: None,
            history: None,
            journal: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_sandbox_provider(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.sandbox_provider = Some(provider);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn build(self) -> Result<Runtime, AgentError> {
        let cfg = self.config;
        let data_dir = cfg.app.data_dir.clone();

        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&cfg),
        };
        let sandbox_provider = match self.sandbox_provider {
            Some(p) => p,
            None => {
                std::fs::create_dir_all(&cfg.sandbox.root)
                    .map_err(|e| AgentError::ConfigError(format!("sandbox root: {e}")))?;
                let mut provider = LocalSandboxProvider::new(&cfg.sandbox.root)
                    .with_host_suffix(cfg.sandbox.host_suffix.clone());
                if let Some(dir) = &cfg.sandbox.templates_dir {
                    provider = provider.with_templates_dir(dir);
                }
                Arc::new(provider) as Arc<dyn SandboxProvider>
            }
        };
        let history = match self.history {
            Some(h) => h,
            None => Arc::new(SqliteHistoryStore::open(data_dir.join("history.db"))?)
                as Arc<dyn HistoryStore>,
        };
        let journal = match self.journal {
            Some(j) => j,
            None => Arc::new(SqliteJournal::open(data_dir.join("journal.db"))?)
                as Arc<dyn StepJournal>,
        };

        let workflow = Arc::new(CodeAgentWorkflow::new(
            WorkflowDeps {
                llm,
                sandbox_provider,
                history: history.clone(),
                journal,
            },
            WorkflowSettings::from(&cfg),
        ));

        let (ingress, rx) = PromptIngress::channel(history.clone(), cfg.workflow.queue_capacity);
        let cancel = CancellationToken::new();
        let (report_tx, reports) = mpsc::unbounded_channel();
        let worker = WorkflowWorker::new(
            workflow,
            history.clone(),
            RecoveryEngine::new(cfg.workflow.max_retries),
            rx,
            cancel.clone(),
        )
        .with_reports(report_tx);

        Ok(Runtime {
            ingress,
            worker,
            history,
            cancel,
            reports,
        })
    }
}
