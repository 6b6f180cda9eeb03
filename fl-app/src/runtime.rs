//! Wires configuration into the shared services every entry point uses.

use crate::config::{FlightLensConfig, LlmBackend};
use anyhow::Result;
use fl_llm::{ChatModel, LlmClient, validate_tool_name};
use fl_powerbi::{
    AadTokenProvider, Clock, DocRetriever, HttpTransport, KeywordRetriever, MetricsCalculator,
    QueryExecutor, ReportClient, ReqwestTransport, SchemaDiscovery, SystemClock, TokenSource,
};
use fl_tools::{
    CompareDimensionTool, DaxSyntaxTool, ExecuteDaxTool, QuickStatTool, SchemaLookupTool, Tool,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Runtime {
    pub tokens: Arc<dyn TokenSource>,
    pub executor: QueryExecutor,
    pub schema: Arc<SchemaDiscovery>,
    pub docs: Arc<KeywordRetriever>,
    pub metrics: MetricsCalculator,
    pub report: ReportClient,
    pub llm: Option<Arc<dyn ChatModel>>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub clock: Arc<dyn Clock>,
}

impl Runtime {
    #[tracing::instrument(level = "info", skip_all)]
    pub fn build(cfg: &FlightLensConfig) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let llm = build_llm(cfg)?;
        Ok(Self::from_parts(cfg, transport, clock, llm))
    }

    /// Assembles the services over an arbitrary transport, clock and model.
    pub fn from_parts(
        cfg: &FlightLensConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        llm: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        let tokens: Arc<dyn TokenSource> = Arc::new(AadTokenProvider::new(
            cfg.credentials(),
            transport.clone(),
            clock.clone(),
        ));
        Self::with_tokens(cfg, tokens, transport, clock, llm)
    }

    pub fn with_tokens(
        cfg: &FlightLensConfig,
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        llm: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        let timeout = Duration::from_secs(cfg.powerbi.timeout_seconds);
        let executor = QueryExecutor::new(tokens.clone(), transport.clone(), cfg.dataset())
            .with_api_base_url(cfg.powerbi.api_base_url.clone())
            .with_timeout(timeout)
            .with_retry(cfg.retry_policy());
        let tables = cfg
            .powerbi
            .tables
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let schema = Arc::new(SchemaDiscovery::new(
            executor.clone(),
            tables,
            Duration::from_secs(cfg.schema.refresh_interval_seconds),
            clock.clone(),
        ));
        let docs_path = cfg.docs_path();
        let docs = Arc::new(KeywordRetriever::new(KeywordRetriever::default_candidates(
            docs_path.as_deref(),
        )));
        let metrics = MetricsCalculator::new(executor.clone());
        let report = ReportClient::new(tokens.clone(), transport, cfg.dataset())
            .with_api_base_url(cfg.powerbi.api_base_url.clone())
            .with_timeout(timeout);

        let doc_retriever: Arc<dyn DocRetriever> = docs.clone();
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(SchemaLookupTool::new(schema.clone())),
            Arc::new(DaxSyntaxTool::new(doc_retriever)),
            Arc::new(ExecuteDaxTool::new(executor.clone())),
            Arc::new(QuickStatTool::new(metrics.clone())),
            Arc::new(CompareDimensionTool::new(metrics.clone())),
        ];
        tracing::debug!(
            tool_count = tools.len(),
            llm_configured = llm.is_some(),
            "runtime assembled"
        );

        Self {
            tokens,
            executor,
            schema,
            docs,
            metrics,
            report,
            llm,
            tools,
            clock,
        }
    }
}

fn build_llm(cfg: &FlightLensConfig) -> Result<Option<Arc<dyn ChatModel>>> {
    let timeout = Duration::from_secs(cfg.llm.timeout_seconds);
    let client = match cfg.llm.backend() {
        Some(LlmBackend::AzureOpenAi) => LlmClient::azure(
            &cfg.llm.endpoint,
            &cfg.llm.api_key,
            &cfg.llm.api_version,
            &cfg.llm.deployment,
            timeout,
        )?,
        Some(LlmBackend::OpenAi) => LlmClient::openai(&cfg.llm.openai_api_key, &cfg.llm.model, timeout)?,
        None => {
            tracing::warn!("no llm deployment configured; agent and insight text are unavailable");
            return Ok(None);
        }
    };
    let client = client.with_temperature(cfg.llm.temperature);
    tracing::info!(model = %client.model(), provider = ?client.provider(), "llm client configured");
    Ok(Some(Arc::new(client)))
}

pub fn preflight_validate_tool_names(tools: &[Arc<dyn Tool>]) -> Result<()> {
    tracing::info!(
        tool_count = tools.len(),
        "preflight tool name validation starting"
    );
    for tool in tools {
        let spec = tool.spec();
        validate_tool_name(&spec.name).map_err(|e| {
            anyhow::anyhow!(
                "preflight tool name validation failed for '{}': {e}",
                spec.name
            )
        })?;
    }
    tracing::info!(
        tool_count = tools.len(),
        "preflight tool name validation passed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_powerbi::testing::{ManualClock, StubTransport};

    #[test]
    fn runtime_registers_the_five_agent_tools_with_valid_names() {
        let cfg = FlightLensConfig::default();
        let runtime = Runtime::from_parts(
            &cfg,
            Arc::new(StubTransport::new()),
            Arc::new(ManualClock::new()),
            None,
        );
        let names: Vec<String> = runtime.tools.iter().map(|t| t.spec().name).collect();
        assert_eq!(
            names,
            vec![
                "schema_lookup",
                "dax_syntax",
                "execute_dax",
                "quick_stat",
                "compare_dimension"
            ]
        );
        preflight_validate_tool_names(&runtime.tools).expect("names valid");
        assert!(runtime.llm.is_none());
    }
}
