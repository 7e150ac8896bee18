//! 编排器构建器：统一从配置装配 LLM、工具、准则与各类回调
//!
//! 调用方（CLI / 服务 / 测试）共享同一套装配逻辑；未显式提供的组件按配置或默认值补齐。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::observability::ReasoningSink;
use crate::orchestrator::{
    EventSink, Guideline, HumanGate, IntentionFallback, Orchestrator, OrchestratorOptions,
    PlanningHook, ResultCallback, StatusObserver,
};
use crate::tools::ToolRegistry;

/// 按可用的 API Key 与 provider 选择 LLM 后端；都没有时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek && provider != "openai" {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(create_deepseek_client(Some(&cfg.llm.model), timeout))
    } else if use_openai {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::with_timeout(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
            timeout,
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: ToolRegistry,
    extra_guidelines: Vec<Guideline>,
    options: Option<OrchestratorOptions>,
    gate: Option<Arc<dyn HumanGate>>,
    result_callback: Option<ResultCallback>,
    status_observer: Option<StatusObserver>,
    events: EventSink,
    reasoning: Option<Arc<dyn ReasoningSink>>,
    planning: Option<Arc<dyn PlanningHook>>,
    fallback: Option<Arc<dyn IntentionFallback>>,
    cancel: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            tools: ToolRegistry::new(),
            extra_guidelines: Vec::new(),
            options: None,
            gate: None,
            result_callback: None,
            status_observer: None,
            events: EventSink::default(),
            reasoning: None,
            planning: None,
            fallback: None,
            cancel: None,
        }
    }

    /// 显式指定 LLM（否则按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// 追加在配置文件准则之后
    pub fn with_guidelines(mut self, guidelines: Vec<Guideline>) -> Self {
        self.extra_guidelines.extend(guidelines);
        self
    }

    /// 覆盖配置中的 [orchestrator] 段
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn HumanGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_result_callback(mut self, callback: ResultCallback) -> Self {
        self.result_callback = Some(callback);
        self
    }

    pub fn with_status_observer(mut self, observer: StatusObserver) -> Self {
        self.status_observer = Some(observer);
        self
    }

    pub fn with_event_tx(mut self, tx: tokio::sync::mpsc::UnboundedSender<crate::orchestrator::AgentEvent>) -> Self {
        self.events = EventSink::new(Some(tx));
        self
    }

    pub fn with_reasoning_sink(mut self, sink: Arc<dyn ReasoningSink>) -> Self {
        self.reasoning = Some(sink);
        self
    }

    pub fn with_planning(mut self, hook: Arc<dyn PlanningHook>) -> Self {
        self.planning = Some(hook);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn IntentionFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 系统提示词：[orchestrator].system_prompt > [app].system_prompt_file > 默认
    fn resolve_options(&self) -> OrchestratorOptions {
        let mut options = self
            .options
            .clone()
            .unwrap_or_else(|| OrchestratorOptions::from(&self.config.orchestrator));
        if options.prompt.system_prompt.is_none() {
            options.prompt.system_prompt = self
                .config
                .app
                .system_prompt_file
                .as_ref()
                .and_then(|p| std::fs::read_to_string(p).ok())
                .filter(|s| !s.trim().is_empty());
        }
        options
    }

    pub fn build(self) -> Orchestrator {
        let options = self.resolve_options();
        let llm = self
            .llm
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let mut guidelines = self.config.guidelines.clone();
        guidelines.extend(self.extra_guidelines);

        tracing::info!(
            tools = self.tools.len(),
            guidelines = guidelines.len(),
            max_rounds = options.max_rounds,
            "orchestrator built"
        );

        let mut orch = Orchestrator::new(llm, Arc::new(self.tools), options)
            .with_guidelines(guidelines)
            .with_events(self.events);
        if let Some(gate) = self.gate {
            orch = orch.with_gate(gate);
        }
        if let Some(cb) = self.result_callback {
            orch = orch.with_result_callback(cb);
        }
        if let Some(observer) = self.status_observer {
            orch = orch.with_status_observer(observer);
        }
        if let Some(sink) = self.reasoning {
            orch = orch.with_reasoning_sink(sink);
        }
        if let Some(hook) = self.planning {
            orch = orch.with_planning(hook);
        }
        if let Some(fallback) = self.fallback {
            orch = orch.with_fallback(fallback);
        }
        if let Some(cancel) = self.cancel {
            orch = orch.with_cancel_token(cancel);
        }
        orch
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// 便捷函数：从默认路径加载配置并创建构建器；加载失败时使用默认配置
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_and_guideline_merge() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.orchestrator.max_rounds = 2;
        cfg.guidelines = vec![Guideline::new("a", "always", "do a")];

        let orch = OrchestratorBuilder::new(cfg)
            .with_guidelines(vec![Guideline::new("b", "sometimes", "do b")])
            .build();
        assert_eq!(orch.options().max_rounds, 2);
        assert!(orch.registry().is_empty());
        let ids: Vec<&str> = orch.guidelines().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_explicit_options_win() {
        let options = OrchestratorOptions {
            loop_threshold: 0,
            ..OrchestratorOptions::default()
        };
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .with_options(options)
            .build();
        assert_eq!(orch.options().loop_threshold, 0);
    }
}
