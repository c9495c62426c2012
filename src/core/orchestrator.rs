//! 流水线装配：配置 -> LLM/工具/四阶段 -> 可复用的 ResearchPipeline
//!
//! 凭证检查在此快速失败（web-search 的 API Key 是硬性要求）。ResearchPipeline 自身
//! 无运行态：run(&self) 每次创建独立的 ResearchState 与会话，多个查询可并发运行，
//! 只共享只读配置与无状态的客户端单例。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ToolsSection};
use crate::core::AgentError;
use crate::llm::{
    create_groq_client, LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient,
};
use crate::research::{
    research_loop, Executor, Planner, ResearchEvent, ResearchSession, ResearchState, Synthesizer,
    Verifier,
};
use crate::tools::{
    ArxivSearchTool, CalculatorTool, CodeRunnerTool, ToolGateway, ToolRegistry, WebSearchTool,
    WikipediaSearchTool,
};

/// 根据配置与环境变量选择 LLM 后端（Groq / OpenAI 兼容 / Mock），并套上重试装饰器
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 Groq Key，或配置为 groq 且只有 OpenAI Key 时也走 Groq 兼容端点
    let use_groq = std::env::var("GROQ_API_KEY").is_ok()
        || (provider == "groq" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "groq";

    let inner: Arc<dyn LlmClient> = if use_groq {
        tracing::info!("Using Groq LLM ({})", cfg.llm.model);
        Arc::new(create_groq_client(Some(&cfg.llm.model), cfg.llm.temperature))
    } else if use_openai {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
            cfg.llm.temperature,
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    };

    Arc::new(RetryingLlmClient::new(
        inner,
        RetryConfig {
            max_attempts: cfg.llm.retry.max_attempts,
            initial_backoff: Duration::from_millis(cfg.llm.retry.initial_backoff_ms),
        },
    ))
}

/// 注册全部五个知识源；web-search 凭证缺失在此快速失败
fn build_registry(tools: &ToolsSection) -> Result<ToolRegistry, AgentError> {
    let tavily_key = std::env::var("TAVILY_API_KEY").map_err(|_| {
        AgentError::Config("TAVILY_API_KEY is required for the web-search tool".to_string())
    })?;

    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool::new(tavily_key, tools.max_search_results));
    registry.register(ArxivSearchTool::new(tools.max_arxiv_results));
    registry.register(WikipediaSearchTool::new(tools.max_wiki_results));
    registry.register(CalculatorTool);
    registry.register(CodeRunnerTool::new(
        tools.python_bin.as_str(),
        tools.code_timeout_secs,
    ));
    Ok(registry)
}

/// 研究流水线：装配好的四阶段 + 重试策略
pub struct ResearchPipeline {
    planner: Planner,
    executor: Executor,
    verifier: Verifier,
    synthesizer: Synthesizer,
    max_retries: u32,
    confidence_threshold: u8,
}

impl ResearchPipeline {
    /// 从配置装配：选择 LLM 后端、注册工具、检查凭证
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let llm = create_llm_from_config(cfg);
        let registry = build_registry(&cfg.tools)?;
        let gateway = Arc::new(ToolGateway::new(
            registry,
            cfg.tools.tool_timeout_secs,
            cfg.tools.max_attempts,
        ));
        Ok(Self::with_clients(llm, gateway, cfg))
    }

    /// 用现成的客户端装配（测试与嵌入场景）
    pub fn with_clients(
        llm: Arc<dyn LlmClient>,
        gateway: Arc<ToolGateway>,
        cfg: &AppConfig,
    ) -> Self {
        let call_delay = Duration::from_millis(cfg.llm.call_delay_ms);
        Self {
            planner: Planner::new(Arc::clone(&llm)),
            executor: Executor::new(
                Arc::clone(&llm),
                gateway,
                cfg.tools.max_concurrent,
                call_delay,
            ),
            verifier: Verifier::new(Arc::clone(&llm)),
            synthesizer: Synthesizer::new(llm, call_delay),
            max_retries: cfg.pipeline.max_verification_retries,
            confidence_threshold: cfg.pipeline.confidence_threshold,
        }
    }

    /// 运行一次研究；返回 Err 仅表示取消，其余结局在返回的状态里
    pub async fn run(
        &self,
        query: &str,
        cancel_token: CancellationToken,
        event_tx: Option<&mpsc::UnboundedSender<ResearchEvent>>,
    ) -> Result<ResearchState, AgentError> {
        let mut session = ResearchSession::new(
            &self.planner,
            &self.executor,
            &self.verifier,
            &self.synthesizer,
            cancel_token,
        )
        .with_retry_policy(self.max_retries, self.confidence_threshold);
        if let Some(tx) = event_tx {
            session = session.with_event_tx(tx);
        }
        research_loop(&session, query).await
    }
}
