use crate::credentials::TokenSource;
use crate::error::{PowerBiError, Result};
use crate::executor::{DEFAULT_API_BASE_URL, DatasetRef};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What a browser needs to render the report without signing in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedInfo {
    pub report_id: String,
    pub embed_url: String,
    pub embed_token: String,
    pub expiration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportDescriptor {
    #[serde(rename = "embedUrl", default)]
    embed_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateTokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expiration: Option<String>,
}

pub struct ReportClient {
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn HttpTransport>,
    api_base_url: String,
    dataset: DatasetRef,
    timeout: Duration,
}

impl ReportClient {
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

    /// Looks up the report's embed URL, then mints a view-only embed token for it.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn embed_info(&self) -> Result<EmbedInfo> {
        let token = self.tokens.get_access_token().await?;
        let workspace = self.dataset.workspace_id.trim();
        let report = self.dataset.report_id.trim();
        if workspace.is_empty() || report.is_empty() {
            return Err(PowerBiError::Config(
                "Missing POWERBI_WORKSPACE_ID or POWERBI_REPORT_ID".to_string(),
            ));
        }

        let report_url = format!("{}/groups/{workspace}/reports/{report}", self.api_base_url);
        let response = self
            .transport
            .send(HttpRequest::get(&report_url, self.timeout).with_bearer(&token))
            .await?;
        let descriptor: ReportDescriptor = self.expect_success(response, "report")?.json()?;
        let embed_url = descriptor
            .embed_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PowerBiError::Remote {
                status: 200,
                body: "report descriptor has no embedUrl".to_string(),
            })?;

        let response = self
            .transport
            .send(
                HttpRequest::post_json(
                    format!("{report_url}/GenerateToken"),
                    serde_json::json!({ "accessLevel": "View" }),
                    self.timeout,
                )
                .with_bearer(&token),
            )
            .await?;
        let generated: GenerateTokenResponse =
            self.expect_success(response, "embed token")?.json()?;
        let embed_token = generated
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PowerBiError::Remote {
                status: 200,
                body: "GenerateToken response has no token".to_string(),
            })?;

        tracing::info!(report_id = report, "embed token generated");
        Ok(EmbedInfo {
            report_id: report.to_string(),
            embed_url,
            embed_token,
            expiration: generated.expiration,
        })
    }

    fn expect_success(&self, response: HttpResponse, what: &str) -> Result<HttpResponse> {
        match response.status {
            s if (200..300).contains(&s) => Ok(response),
            401 | 403 => Err(PowerBiError::Auth(format!(
                "{what} request rejected with status {}",
                response.status
            ))),
            404 => Err(PowerBiError::NotFound(format!(
                "report {} in workspace {}",
                self.dataset.report_id.trim(),
                self.dataset.workspace_id.trim()
            ))),
            status => Err(PowerBiError::Remote {
                status,
                body: response.body.chars().take(200).collect(),
            }),
        }
    }
}
