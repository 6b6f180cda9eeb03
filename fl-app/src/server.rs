//! flightlens HTTP server.
//!
//! Builds the shared [`AppState`] and mounts the API routes under the request-id,
//! tracing, timeout and concurrency-limit layers.

use crate::agent::{AgentFailure, QueryAgent};
use crate::config::FlightLensConfig;
use crate::insights::InsightService;
use crate::routes;
use crate::runtime::{Runtime, preflight_validate_tool_names};
use crate::session::SessionStore;
use anyhow::Result;
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use fl_powerbi::FilterContext;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: FlightLensConfig,
    pub runtime: Runtime,
    pub agent: Option<QueryAgent>,
    pub insights: InsightService,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: FlightLensConfig, runtime: Runtime) -> Self {
        let agent = runtime
            .llm
            .clone()
            .map(|llm| QueryAgent::new(llm, runtime.tools.clone(), config.llm.max_tool_loops));
        let insights = InsightService::new(runtime.metrics.clone(), runtime.llm.clone());
        let sessions = SessionStore::new(config.insights.clone(), config.llm.history_messages);
        Self {
            config,
            runtime,
            agent,
            insights,
            sessions,
        }
    }

    /// Runs one question through the agent inside the named session. `filters`
    /// replaces the session's active filter context when given.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn ask(
        &self,
        session_id: Option<&str>,
        question: &str,
        filters: Option<FilterContext>,
        verbose: bool,
    ) -> std::result::Result<String, AgentFailure> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentFailure {
                message: "Please enter a question.".to_string(),
                detail: None,
            });
        }
        let Some(agent) = self.agent.as_ref() else {
            let err = anyhow::anyhow!(
                "LLM deployment is not configured; set AZURE_OPENAI_* or OPENAI_API_KEY"
            );
            return Err(AgentFailure {
                message: "The assistant is not configured.".to_string(),
                detail: verbose.then(|| err.to_string()),
            });
        };

        let session = self.sessions.get_or_create(session_id);
        let mut session = session.lock().await;
        if let Some(filters) = filters {
            session.filters = filters;
        }
        let active_filters = session.filters.clone();
        let mut run_transcript = session.transcript.clone();
        match agent
            .answer(question, &active_filters, &mut run_transcript)
            .await
        {
            Ok((answer, usage)) => {
                session.remember_exchange(question, &answer);
                session.record_usage(usage);
                Ok(answer)
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "agent run failed");
                Err(AgentFailure::from_error(&e, verbose))
            }
        }
    }
}

pub fn app(state: Arc<AppState>) -> axum::Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let max_in_flight = state.config.server.http_max_in_flight;
    let timeout = Duration::from_secs(state.config.server.http_timeout_seconds);
    routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = FlightLensConfig::load_with_path(config_path).await?;
    cfg.require_complete()?;
    let addr = cfg.bind_addr()?;
    tracing::info!(config_path = %path.display(), %addr, "configuration loaded");

    let runtime = Runtime::build(&cfg)?;
    preflight_validate_tool_names(&runtime.tools)?;
    if runtime.docs.resolved_path().is_none() {
        tracing::warn!("dax documentation file not found; dax_syntax will report it missing");
    }
    let listener = preflight_bind_listener(addr).await?;

    let state = Arc::new(AppState::new(cfg, runtime));
    let shutdown = CancellationToken::new();

    tracing::info!(%addr, "flightlens serving");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
