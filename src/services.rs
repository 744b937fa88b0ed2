use std::sync::Arc;

use futures::Stream;
use uuid::Uuid;

use crate::breaker::{CircuitBreakerConfig, CircuitBreakerManager};
use crate::chain::ChainExecutor;
use crate::config::{MemorySettingsStore, OpsConfig, SettingsStore};
use crate::error::OpsError;
use crate::llm::{ChatClient, Llm};
use crate::pipeline::{
    ask_stream, MemoryQueryHistoryStore, PipelineRunner, QueryHistoryStore,
};
use crate::planner::Planner;
use crate::query::QueryResolver;
use crate::registry::{AssetRegistry, AssetStore, MemoryAssetStore, RegistryCaches};
use crate::schemas::{AskRequest, AskResponse, ExecutionTrace, StreamEvent};
use crate::source::{EnvSecretResolver, SecretResolver, SourcePool};
use crate::tools::{
    BackendDispatcher, ResultCache, ToolDispatcher, ToolExecutor, ToolRegistry,
};
use crate::tracer::{MemoryTraceStore, TraceQuery, TraceStore};
use crate::validator::PlanValidator;

const DEFAULT_SCOPE: &str = "ops";

/// Everything the process shares, constructed once at startup and passed
/// explicitly into each request. No hidden globals.
pub struct Services {
    pub config: Arc<OpsConfig>,
    pub registry: Arc<AssetRegistry>,
    pub caches: Arc<RegistryCaches>,
    pub pools: Arc<SourcePool>,
    pub tools: Arc<ToolRegistry>,
    pub tool_executor: Arc<ToolExecutor>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub traces: Arc<dyn TraceStore>,
    pub history: Arc<dyn QueryHistoryStore>,
    pub runner: Arc<PipelineRunner>,
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    /// The non-streaming request surface.
    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        self.runner.ask(request).await
    }

    /// The streaming request surface: progress events per stage, then a
    /// terminal complete or error event.
    pub fn ask_stream(&self, request: AskRequest) -> impl Stream<Item = StreamEvent> {
        ask_stream(Arc::clone(&self.runner), request)
    }

    /// Inspector surface.
    pub async fn get_trace(&self, trace_id: Uuid) -> Result<Option<ExecutionTrace>, OpsError> {
        self.traces.get(trace_id).await.map_err(OpsError::from)
    }

    pub async fn search_traces(&self, query: &TraceQuery) -> Result<Vec<ExecutionTrace>, OpsError> {
        self.traces.search(query).await.map_err(OpsError::from)
    }

    /// The explicit reload signal: drops every derived cache so the next
    /// read sees freshly published assets.
    pub async fn reload(&self) {
        self.caches.invalidate_all().await;
        self.tools.invalidate().await;
        self.pools.invalidate().await;
        log::info!("services reloaded");
    }
}

/// Startup wiring. Defaults give a self-contained in-memory deployment;
/// production wires Postgres-backed stores, the real LLM client and the
/// backend dispatcher.
pub struct ServicesBuilder {
    scope: String,
    asset_store: Option<Arc<dyn AssetStore>>,
    trace_store: Option<Arc<dyn TraceStore>>,
    history_store: Option<Arc<dyn QueryHistoryStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    secret_resolver: Option<Arc<dyn SecretResolver>>,
    llm: Option<Arc<dyn Llm>>,
    dispatcher: Option<Arc<dyn ToolDispatcher>>,
    breaker_config: CircuitBreakerConfig,
}

impl Default for ServicesBuilder {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.into(),
            asset_store: None,
            trace_store: None,
            history_store: None,
            settings_store: None,
            secret_resolver: None,
            llm: None,
            dispatcher: None,
            breaker_config: CircuitBreakerConfig::default(),
        }
    }
}

impl ServicesBuilder {
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_asset_store(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.asset_store = Some(store);
        self
    }

    pub fn with_trace_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.trace_store = Some(store);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn QueryHistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn with_secret_resolver(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.secret_resolver = Some(resolver);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub async fn build(self) -> Result<Services, OpsError> {
        let settings_store = self
            .settings_store
            .unwrap_or_else(|| Arc::new(MemorySettingsStore::default()));
        let config = Arc::new(
            OpsConfig::load(settings_store.as_ref())
                .await
                .map_err(|err| OpsError::new(crate::error::ErrorCode::ConfigurationError, err.to_string()))?,
        );

        let asset_store = self
            .asset_store
            .unwrap_or_else(|| Arc::new(MemoryAssetStore::new()));
        let registry = Arc::new(AssetRegistry::new(asset_store));
        let caches = Arc::new(RegistryCaches::new(Arc::clone(&registry), self.scope.clone()));
        let secret_resolver = self
            .secret_resolver
            .unwrap_or_else(|| Arc::new(EnvSecretResolver));
        let pools = Arc::new(SourcePool::new(
            Arc::clone(&registry),
            Arc::clone(&secret_resolver),
            self.scope.clone(),
        ));
        let query_resolver = Arc::new(QueryResolver::new(
            Arc::clone(&registry),
            self.scope.clone(),
        ));
        let dispatcher = self.dispatcher.unwrap_or_else(|| {
            Arc::new(BackendDispatcher::new(
                Arc::clone(&pools),
                Arc::clone(&query_resolver),
            ))
        });
        let tools = Arc::new(ToolRegistry::new(Arc::clone(&registry), self.scope.clone()));
        let breakers = Arc::new(CircuitBreakerManager::new(self.breaker_config));
        let tool_executor = Arc::new(ToolExecutor::new(
            Arc::clone(&tools),
            dispatcher,
            Arc::new(ResultCache::new(config.cache_ttl)),
            Arc::clone(&breakers),
        ));
        let chain = Arc::new(ChainExecutor::new(Arc::clone(&tool_executor)));
        let llm = self.llm.unwrap_or_else(|| Arc::new(ChatClient::new()));
        let planner = Arc::new(Planner::new(
            Arc::clone(&registry),
            Arc::clone(&caches),
            Arc::clone(&tools),
            llm,
            self.scope.clone(),
        ));
        let validator = Arc::new(PlanValidator::new(
            Arc::clone(&caches),
            Arc::clone(&tools),
        ));
        let traces = self
            .trace_store
            .unwrap_or_else(|| Arc::new(MemoryTraceStore::new()));
        let history = self
            .history_store
            .unwrap_or_else(|| Arc::new(MemoryQueryHistoryStore::default()));
        let runner = Arc::new(PipelineRunner::new(
            planner,
            validator,
            chain,
            Arc::clone(&traces),
            Arc::clone(&history),
            Arc::clone(&config),
        ));

        Ok(Services {
            config,
            registry,
            caches,
            pools,
            tools,
            tool_executor,
            breakers,
            traces,
            history,
            runner,
        })
    }
}
