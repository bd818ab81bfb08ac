//! 执行器构建器：从 AppConfig 组装 TaskExecutor 的各个协作方
//!
//! 未显式注入的部分使用默认实现：ProcfsSource、按环境变量选择的 LLM、PlannerRouter、
//! DefaultGovernance，以及按 store_path 选择的 JSONL 或内存反思存储。

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::core::{RecoveryEngine, TaskExecutor};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::mode::{DefaultGovernance, Governance, ModeController};
use crate::monitor::MonitorOptions;
use crate::persistence::{JsonlReflectionStore, MemoryReflectionSink, ReflectionSink};
use crate::reflection::ReflectionGenerator;
use crate::routing::{PlannerRouter, Router};
use crate::sensors::{MetricSource, ProcfsSource, SensorCache};
use crate::tools::{EchoTool, SystemMetricsTool, Tool, ToolExecutor, ToolRegistry};

/// TaskExecutor 构建器
pub struct ExecutorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    delegate: Option<Arc<dyn LlmClient>>,
    reflection_llm: Option<Arc<dyn LlmClient>>,
    router: Option<Arc<dyn Router>>,
    source: Option<Arc<dyn MetricSource>>,
    sink: Option<Arc<dyn ReflectionSink>>,
    governance: Option<Arc<dyn Governance>>,
    extra_tools: Vec<Box<dyn FnOnce(&mut ToolRegistry) + Send>>,
}

impl ExecutorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            delegate: None,
            reflection_llm: None,
            router: None,
            source: None,
            sink: None,
            governance: None,
            extra_tools: Vec::new(),
        }
    }

    /// 路由、委托与反思默认共用的 LLM
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_delegate_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.delegate = Some(llm);
        self
    }

    pub fn with_reflection_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.reflection_llm = Some(llm);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReflectionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_governance(mut self, governance: Arc<dyn Governance>) -> Self {
        self.governance = Some(governance);
        self
    }

    /// 额外注册一个工具
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools
            .push(Box::new(move |registry: &mut ToolRegistry| registry.register(tool)));
        self
    }

    /// 统一的工具注册表：echo、system_metrics 以及额外注入的工具
    fn build_tool_registry(&mut self, cache: &Arc<SensorCache>) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(SystemMetricsTool::new(cache.clone()));
        for register in self.extra_tools.drain(..) {
            register(&mut tools);
        }
        tools
    }

    fn build_sink(&self) -> Arc<dyn ReflectionSink> {
        match &self.config.reflection.store_path {
            Some(path) => Arc::new(JsonlReflectionStore::new(path)),
            None => Arc::new(MemoryReflectionSink::new()),
        }
    }

    pub fn build(mut self) -> TaskExecutor {
        let source = self
            .source
            .take()
            .unwrap_or_else(|| Arc::new(ProcfsSource::new()));
        let cache = Arc::new(SensorCache::from_config(source, &self.config.cache));

        let llm = self
            .llm
            .take()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let delegate = self.delegate.take().unwrap_or_else(|| llm.clone());
        let reflection_llm = self.reflection_llm.take().unwrap_or_else(|| llm.clone());

        let tools = self.build_tool_registry(&cache);
        let router = self.router.take().unwrap_or_else(|| {
            Arc::new(PlannerRouter::new(llm.clone(), &tools.to_schema_json()))
        });
        let sink = self.sink.take().unwrap_or_else(|| self.build_sink());
        let governance = self
            .governance
            .take()
            .unwrap_or_else(|| Arc::new(DefaultGovernance));

        let controller = ModeController::new(&self.config.mode);
        let mode_handle = controller.handle();
        let thresholds = *controller.thresholds();

        TaskExecutor {
            router,
            delegate,
            tools: ToolExecutor::new(tools),
            cache,
            mode: Arc::new(Mutex::new(controller)),
            mode_handle,
            thresholds,
            governance,
            recovery: RecoveryEngine::from_config(&self.config.executor),
            monitor_options: MonitorOptions::from(&self.config.monitor),
            reflection: Arc::new(ReflectionGenerator::new(reflection_llm, &self.config.reflection)),
            sink,
            pending: StdMutex::new(Vec::new()),
        }
    }
}
