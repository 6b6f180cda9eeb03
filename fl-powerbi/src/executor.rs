//! Authenticated DAX execution against a Power BI dataset.

use crate::credentials::TokenSource;
use crate::envelope::QueryResponse;
use crate::error::{PowerBiError, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_API_BASE_URL: &str = "https://api.powerbi.com/v1.0/myorg";

/// Identifies the remote dataset and, separately, the visual report.
#[derive(Debug, Clone, Default)]
pub struct DatasetRef {
    pub workspace_id: String,
    pub dataset_id: String,
    pub report_id: String,
}

impl DatasetRef {
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.workspace_id.trim().is_empty() {
            out.push("POWERBI_WORKSPACE_ID");
        }
        if self.dataset_id.trim().is_empty() {
            out.push("POWERBI_DATASET_ID");
        }
        if self.report_id.trim().is_empty() {
            out.push("POWERBI_REPORT_ID");
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.saturating_sub(1).min(10);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct QueryExecutor {
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn HttpTransport>,
    api_base_url: String,
    dataset: DatasetRef,
    timeout: Duration,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn HttpTransport>,
        dataset: DatasetRef,
    ) -> Self {
        Self {
            tokens,
            transport,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            dataset,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn execute_url(&self) -> String {
        format!(
            "{}/groups/{}/datasets/{}/executeQueries",
            self.api_base_url,
            self.dataset.workspace_id.trim(),
            self.dataset.dataset_id.trim()
        )
    }

    /// Runs one DAX query. Transient statuses (429/5xx gateway family) are retried
    /// with exponential backoff; every other failure is returned on first sight.
    #[tracing::instrument(level = "info", skip_all, fields(query_len = query.len()))]
    pub async fn execute_query(&self, query: &str) -> Result<QueryResponse> {
        if query.trim().is_empty() {
            return Err(PowerBiError::Query {
                code: "EmptyQuery".to_string(),
                message: "query text must not be empty".to_string(),
            });
        }
        let token = self.tokens.get_access_token().await?;
        if self.dataset.workspace_id.trim().is_empty() || self.dataset.dataset_id.trim().is_empty()
        {
            return Err(PowerBiError::Config(
                "Missing POWERBI_WORKSPACE_ID or POWERBI_DATASET_ID".to_string(),
            ));
        }

        let body = serde_json::json!({
            "queries": [{ "query": query }],
            "serializerSettings": { "includeNulls": true },
        });
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let request = HttpRequest::post_json(self.execute_url(), body.clone(), self.timeout)
                .with_bearer(token.clone());
            let outcome = match self.transport.send(request).await {
                Ok(response) => classify_response(response, &self.dataset),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(parsed) => {
                    tracing::info!(
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        rows = parsed.first_rows().len(),
                        "dax query executed"
                    );
                    return Ok(parsed);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        ?delay,
                        "dax query transient failure; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, kind = ?e.kind(), attempt, "dax query failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Maps an engine response onto the error taxonomy.
pub(crate) fn classify_response(response: HttpResponse, dataset: &DatasetRef) -> Result<QueryResponse> {
    match response.status {
        200..=299 => response.json(),
        400 => {
            let detail: EngineErrorBody = serde_json::from_str(&response.body).unwrap_or_default();
            let error = detail.error.unwrap_or_default();
            Err(PowerBiError::Query {
                code: error.code.unwrap_or_default(),
                message: error.message.unwrap_or_else(|| "Invalid query".to_string()),
            })
        }
        401 => Err(PowerBiError::Auth("401 Unauthorized".to_string())),
        403 => Err(PowerBiError::Auth("403 Forbidden".to_string())),
        404 => Err(PowerBiError::NotFound(format!(
            "404 Not Found (workspace={}, dataset={})",
            dataset.workspace_id, dataset.dataset_id
        ))),
        status => Err(PowerBiError::Remote {
            status,
            body: truncate(&response.body, 200),
        }),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct EngineErrorBody {
    #[serde(default)]
    error: Option<EngineError>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{StaticTokenSource, StubTransport, rows_envelope};
    use serde_json::json;

    fn dataset() -> DatasetRef {
        DatasetRef {
            workspace_id: "ws".to_string(),
            dataset_id: "ds".to_string(),
            report_id: "rp".to_string(),
        }
    }

    fn executor(transport: Arc<StubTransport>) -> QueryExecutor {
        QueryExecutor::new(Arc::new(StaticTokenSource("tok".to_string())), transport, dataset())
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            })
    }

    #[tokio::test]
    async fn success_returns_typed_envelope() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, rows_envelope(json!([{"[Total]": 42}])));
        let resp = executor(transport.clone())
            .execute_query("EVALUATE ROW(\"Total\", 42)")
            .await
            .expect("query succeeds");
        assert_eq!(resp.scalar(), Some(42.0));

        let request = &transport.requests()[0];
        assert_eq!(
            request.url,
            "https://api.powerbi.com/v1.0/myorg/groups/ws/datasets/ds/executeQueries"
        );
        assert_eq!(request.bearer.as_deref(), Some("tok"));
        let crate::transport::RequestBody::Json(body) = &request.body else {
            panic!("expected json body");
        };
        assert_eq!(body["serializerSettings"]["includeNulls"], true);
    }

    #[tokio::test]
    async fn status_codes_map_to_error_kinds_without_retry() {
        let cases = [
            (400, ErrorKind::Query),
            (401, ErrorKind::Auth),
            (403, ErrorKind::Auth),
            (404, ErrorKind::NotFound),
            (501, ErrorKind::Remote),
        ];
        for (status, kind) in cases {
            let transport = Arc::new(StubTransport::new());
            transport.push_json(
                status,
                json!({"error": {"code": "DatasetExecuteQueriesError", "message": "bad column"}}),
            );
            let err = executor(transport.clone())
                .execute_query("EVALUATE 'flights'")
                .await
                .expect_err("status maps to error");
            assert_eq!(err.kind(), kind, "status {status}");
            assert_eq!(transport.request_count(), 1, "status {status} must not retry");
        }
    }

    #[tokio::test]
    async fn bad_request_carries_engine_code_and_message() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(
            400,
            json!({"error": {"code": "DatasetExecuteQueriesError", "message": "Column 'DELAY' cannot be found"}}),
        );
        let err = executor(transport)
            .execute_query("EVALUATE ROW(\"x\", SUM('flights'[DELAY]))")
            .await
            .expect_err("query error");
        assert_eq!(
            err,
            PowerBiError::Query {
                code: "DatasetExecuteQueriesError".to_string(),
                message: "Column 'DELAY' cannot be found".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn service_unavailable_is_retried_up_to_max_attempts() {
        let transport = Arc::new(StubTransport::new());
        for _ in 0..3 {
            transport.push_raw(503, "Service Unavailable");
        }
        let err = executor(transport.clone())
            .execute_query("EVALUATE 'flights'")
            .await
            .expect_err("remote error after retries");
        assert!(matches!(err, PowerBiError::Remote { status: 503, .. }));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success_recovers() {
        let transport = Arc::new(StubTransport::new());
        transport.push_raw(429, "Too Many Requests");
        transport.push_json(200, rows_envelope(json!([{"[Total]": 1}])));
        let resp = executor(transport.clone())
            .execute_query("EVALUATE ROW(\"Total\", 1)")
            .await
            .expect("second attempt succeeds");
        assert_eq!(resp.scalar(), Some(1.0));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let transport = Arc::new(StubTransport::new());
        transport.push_error(PowerBiError::Transport("request timed out after 30s".to_string()));
        let err = executor(transport.clone())
            .execute_query("EVALUATE 'flights'")
            .await
            .expect_err("transport error");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn missing_dataset_id_is_config_error() {
        let transport = Arc::new(StubTransport::new());
        let mut ds = dataset();
        ds.dataset_id.clear();
        let exec = QueryExecutor::new(Arc::new(StaticTokenSource("tok".to_string())), transport.clone(), ds);
        let err = exec.execute_query("EVALUATE 'flights'").await.expect_err("config");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(20), Duration::from_secs(4));
    }
}
