use crate::error::{PowerBiError, Result};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            bearer: None,
            body: RequestBody::Empty,
            timeout,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            bearer: None,
            body: RequestBody::Json(body),
            timeout,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            bearer: None,
            body: RequestBody::Form(form),
            timeout,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            PowerBiError::Transport(format!("invalid json body (status {}): {e}", self.status))
        })
    }
}

/// Single seam for every remote call. Non-2xx statuses are returned as responses;
/// only network failures and timeouts become errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(method = ?request.method))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };
        let builder = builder.timeout(request.timeout);
        let builder = match request.bearer.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        let builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(form) => builder.form(form),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PowerBiError::Transport(format!(
                    "request timed out after {}s",
                    request.timeout.as_secs()
                ))
            } else {
                PowerBiError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!(status, body_len = body.len(), "http response received");
        Ok(HttpResponse { status, body })
    }
}
