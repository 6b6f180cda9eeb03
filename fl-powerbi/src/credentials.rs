//! Client-credentials token exchange against Azure AD.

use crate::clock::Clock;
use crate::error::{PowerBiError, Result};
use crate::transport::{HttpRequest, HttpTransport};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_POWERBI_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct AzureAdCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: String,
    pub scope: String,
}

impl AzureAdCredentials {
    /// Names of the required settings that are empty.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.tenant_id.trim().is_empty() {
            out.push("AAD_TENANT_ID");
        }
        if self.client_id.trim().is_empty() {
            out.push("AAD_CLIENT_ID");
        }
        if self.client_secret.trim().is_empty() {
            out.push("AAD_CLIENT_SECRET");
        }
        out
    }

    fn token_url(&self) -> String {
        let host = if self.authority_host.trim().is_empty() {
            DEFAULT_AUTHORITY_HOST
        } else {
            self.authority_host.trim().trim_end_matches('/')
        };
        format!("{host}/{}/oauth2/v2.0/token", self.tenant_id.trim())
    }

    fn scope(&self) -> &str {
        if self.scope.trim().is_empty() {
            DEFAULT_POWERBI_SCOPE
        } else {
            self.scope.trim()
        }
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn get_access_token(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Exchanges the service principal credentials for a bearer token and keeps it
/// until shortly before the identity provider's reported expiry.
pub struct AadTokenProvider {
    credentials: AzureAdCredentials,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedToken>>,
}

impl AadTokenProvider {
    pub fn new(
        credentials: AzureAdCredentials,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            transport,
            clock,
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<(String, Duration)> {
        let form = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.credentials.client_id.trim().to_string()),
            (
                "client_secret".to_string(),
                self.credentials.client_secret.trim().to_string(),
            ),
            ("scope".to_string(), self.credentials.scope().to_string()),
        ];
        let request = HttpRequest::post_form(self.credentials.token_url(), form, TOKEN_REQUEST_TIMEOUT);
        let response = self.transport.send(request).await.map_err(|e| match e {
            PowerBiError::Transport(msg) => {
                PowerBiError::Auth(format!("Failed to get Power BI token: {msg}"))
            }
            other => other,
        })?;

        let parsed: TokenResponse = serde_json::from_str(&response.body).unwrap_or_default();
        match parsed.access_token {
            Some(token) if response.is_success() && !token.is_empty() => {
                let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3599));
                Ok((token, lifetime))
            }
            _ => {
                let description = parsed
                    .error_description
                    .or(parsed.error)
                    .unwrap_or_else(|| "Unknown error".to_string());
                tracing::warn!(status = response.status, "identity provider rejected token request");
                Err(PowerBiError::Auth(format!("Token error: {description}")))
            }
        }
    }
}

#[async_trait]
impl TokenSource for AadTokenProvider {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn get_access_token(&self) -> Result<String> {
        let missing = self.credentials.missing();
        if !missing.is_empty() {
            return Err(PowerBiError::Config(format!(
                "Missing Azure AD credentials: {}",
                missing.join(", ")
            )));
        }

        let mut cached = self.cached.lock().await;
        let now = self.clock.now();
        if let Some(entry) = cached.as_ref() {
            if now < entry.refresh_at {
                return Ok(entry.token.clone());
            }
        }

        let (token, lifetime) = self.fetch().await?;
        let refresh_at = now + lifetime.saturating_sub(TOKEN_EXPIRY_SKEW);
        tracing::info!(lifetime_secs = lifetime.as_secs(), "power bi access token acquired");
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at,
        });
        Ok(token)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, StubTransport};
    use crate::transport::RequestBody;

    fn credentials() -> AzureAdCredentials {
        AzureAdCredentials {
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_client_secret_fails_without_network_call() {
        let transport = Arc::new(StubTransport::new());
        let mut creds = credentials();
        creds.client_secret = "  ".to_string();
        let provider = AadTokenProvider::new(creds, transport.clone(), Arc::new(ManualClock::new()));

        let err = provider.get_access_token().await.expect_err("config error");
        assert!(matches!(err, PowerBiError::Config(ref msg) if msg.contains("AAD_CLIENT_SECRET")));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn token_is_cached_until_expiry_skew() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, serde_json::json!({"access_token": "t1", "expires_in": 120}));
        transport.push_json(200, serde_json::json!({"access_token": "t2", "expires_in": 120}));
        let clock = Arc::new(ManualClock::new());
        let provider = AadTokenProvider::new(credentials(), transport.clone(), clock.clone());

        assert_eq!(provider.get_access_token().await.expect("token"), "t1");
        clock.advance(Duration::from_secs(30));
        assert_eq!(provider.get_access_token().await.expect("token"), "t1");
        assert_eq!(transport.request_count(), 1);

        clock.advance(Duration::from_secs(31));
        assert_eq!(provider.get_access_token().await.expect("token"), "t2");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn token_request_uses_client_credentials_form() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, serde_json::json!({"access_token": "t1"}));
        let provider =
            AadTokenProvider::new(credentials(), transport.clone(), Arc::new(ManualClock::new()));
        provider.get_access_token().await.expect("token");

        let request = &transport.requests()[0];
        assert_eq!(
            request.url,
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
        let RequestBody::Form(form) = &request.body else {
            panic!("expected form body, got {:?}", request.body);
        };
        assert!(form.contains(&("grant_type".to_string(), "client_credentials".to_string())));
        assert!(form.contains(&("scope".to_string(), DEFAULT_POWERBI_SCOPE.to_string())));
    }

    #[tokio::test]
    async fn identity_rejection_is_auth_error_with_description() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(
            401,
            serde_json::json!({"error": "invalid_client", "error_description": "AADSTS7000215: Invalid client secret"}),
        );
        let provider =
            AadTokenProvider::new(credentials(), transport.clone(), Arc::new(ManualClock::new()));
        let err = provider.get_access_token().await.expect_err("auth error");
        assert_eq!(
            err,
            PowerBiError::Auth("Token error: AADSTS7000215: Invalid client secret".to_string())
        );
    }

    #[tokio::test]
    async fn network_failure_is_auth_error() {
        let transport = Arc::new(StubTransport::new());
        transport.push_error(PowerBiError::Transport("connection refused".to_string()));
        let provider =
            AadTokenProvider::new(credentials(), transport.clone(), Arc::new(ManualClock::new()));
        let err = provider.get_access_token().await.expect_err("auth error");
        assert!(matches!(err, PowerBiError::Auth(ref msg) if msg.contains("connection refused")));
    }
}
