//! In-memory doubles for the transport, token and clock seams.

use crate::clock::Clock;
use crate::credentials::TokenSource;
use crate::error::{PowerBiError, Result};
use crate::executor::{DatasetRef, QueryExecutor, RetryPolicy};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, RequestBody};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Replays queued responses in FIFO order, falling back to a responder closure
/// once the queue is empty. Every request is recorded.
#[derive(Default)]
pub struct StubTransport {
    queued: Mutex<VecDeque<Result<HttpResponse>>>,
    responder: Mutex<Option<Responder>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_raw(status, body.to_string());
    }

    pub fn push_raw(&self, status: u16, body: impl Into<String>) {
        lock(&self.queued).push_back(Ok(HttpResponse {
            status,
            body: body.into(),
        }));
    }

    pub fn push_error(&self, error: PowerBiError) {
        lock(&self.queued).push_back(Err(error));
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// DAX texts of every `executeQueries` request, in send order.
    pub fn sent_queries(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .filter_map(query_text)
            .collect()
    }
}

/// Extracts `queries[0].query` from an executeQueries request body.
pub fn query_text(request: &HttpRequest) -> Option<String> {
    let RequestBody::Json(body) = &request.body else {
        return None;
    };
    body.get("queries")?
        .get(0)?
        .get("query")?
        .as_str()
        .map(str::to_string)
}

/// Wraps rows in the executeQueries success envelope.
pub fn rows_envelope(rows: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "results": [ { "tables": [ { "rows": rows } ] } ] })
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        lock(&self.requests).push(request.clone());
        if let Some(next) = lock(&self.queued).pop_front() {
            return next;
        }
        match lock(&self.responder).as_ref() {
            Some(responder) => responder(&request),
            None => Err(PowerBiError::Transport(format!(
                "stub transport has no response for {}",
                request.url
            ))),
        }
    }
}

/// Executor over the stub with a fixed token, ids `ws`/`ds`/`rep`, and no retries.
pub fn stub_executor(transport: Arc<StubTransport>) -> QueryExecutor {
    QueryExecutor::new(
        Arc::new(StaticTokenSource("tok".to_string())),
        transport,
        DatasetRef {
            workspace_id: "ws".to_string(),
            dataset_id: "ds".to_string(),
            report_id: "rep".to_string(),
        },
    )
    .with_retry(RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    })
}

/// Token source that always succeeds with a fixed token.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn get_access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
