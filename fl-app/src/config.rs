//! flightlens configuration loader.
//!
//! Defaults, then `~/.flightlens/config.toml` (optional), then environment.

use fl_powerbi::credentials::{DEFAULT_AUTHORITY_HOST, DEFAULT_POWERBI_SCOPE};
use fl_powerbi::executor::DEFAULT_API_BASE_URL;
use fl_powerbi::schema::DEFAULT_TABLES;
use fl_powerbi::{AzureAdCredentials, DatasetRef, RetryPolicy};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlightLensConfig {
    #[serde(default)]
    pub azure_ad: AzureAdConfig,
    #[serde(default)]
    pub powerbi: PowerBiConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureAdConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for AzureAdConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            authority_host: default_authority_host(),
            scope: default_scope(),
        }
    }
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_scope() -> String {
    DEFAULT_POWERBI_SCOPE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowerBiConfig {
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub report_id: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_powerbi_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_tables")]
    pub tables: Vec<String>,
}

impl Default for PowerBiConfig {
    fn default() -> Self {
        Self {
            workspace_id: String::new(),
            dataset_id: String::new(),
            report_id: String::new(),
            api_base_url: default_api_base_url(),
            timeout_seconds: default_powerbi_timeout_seconds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            tables: default_tables(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_powerbi_timeout_seconds() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    4000
}

fn default_tables() -> Vec<String> {
    DEFAULT_TABLES.iter().map(|t| t.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub deployment: String,
    /// Used only with the public OpenAI provider (`OPENAI_API_KEY`).
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tool_loops")]
    pub max_tool_loops: usize,
    /// Prior question/answer messages carried into the next question of a session.
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_version: default_api_version(),
            deployment: String::new(),
            model: default_model(),
            openai_api_key: String::new(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout_seconds(),
            max_tool_loops: default_max_tool_loops(),
            history_messages: default_history_messages(),
        }
    }
}

fn default_api_version() -> String {
    "2024-06-01".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_llm_timeout_seconds() -> u64 {
    60
}

fn default_max_tool_loops() -> usize {
    12
}

fn default_history_messages() -> usize {
    8
}

/// Which chat-completions backend the configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    AzureOpenAi,
    OpenAi,
}

impl LlmConfig {
    /// Azure when its deployment group is complete, otherwise public OpenAI when a key is set.
    pub fn backend(&self) -> Option<LlmBackend> {
        if self.azure_missing().is_empty() {
            Some(LlmBackend::AzureOpenAi)
        } else if !self.openai_api_key.trim().is_empty() {
            Some(LlmBackend::OpenAi)
        } else {
            None
        }
    }

    fn azure_missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.endpoint.trim().is_empty() {
            out.push("AZURE_OPENAI_ENDPOINT");
        }
        if self.api_key.trim().is_empty() {
            out.push("AZURE_OPENAI_API_KEY");
        }
        if self.api_version.trim().is_empty() {
            out.push("AZURE_OPENAI_API_VERSION");
        }
        if self.deployment.trim().is_empty() {
            out.push("AZURE_OPENAI_DEPLOYMENT_NAME");
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval_seconds(),
        }
    }
}

fn default_refresh_interval_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocsConfig {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_entries: default_cache_max_entries(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_cache_ttl_seconds() -> u64 {
    1800
}

fn default_cache_max_entries() -> u64 {
    256
}

fn default_history_limit() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8501".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    120
}

fn default_http_max_in_flight() -> usize {
    64
}

/// A required configuration group with the variables it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingGroup {
    pub group: &'static str,
    pub variables: Vec<&'static str>,
}

impl std::fmt::Display for MissingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.group, self.variables.join(", "))
    }
}

impl FlightLensConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env"),
        }

        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Non-empty values from `lookup` replace file values.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let overrides: [(&str, &mut String); 12] = [
            ("AAD_TENANT_ID", &mut self.azure_ad.tenant_id),
            ("AAD_CLIENT_ID", &mut self.azure_ad.client_id),
            ("AAD_CLIENT_SECRET", &mut self.azure_ad.client_secret),
            ("POWERBI_WORKSPACE_ID", &mut self.powerbi.workspace_id),
            ("POWERBI_DATASET_ID", &mut self.powerbi.dataset_id),
            ("POWERBI_REPORT_ID", &mut self.powerbi.report_id),
            ("AZURE_OPENAI_ENDPOINT", &mut self.llm.endpoint),
            ("AZURE_OPENAI_API_KEY", &mut self.llm.api_key),
            ("AZURE_OPENAI_API_VERSION", &mut self.llm.api_version),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", &mut self.llm.deployment),
            ("OPENAI_API_KEY", &mut self.llm.openai_api_key),
            ("FLIGHTLENS_MODEL", &mut self.llm.model),
        ];
        for (key, slot) in overrides {
            if let Some(v) = get(key) {
                *slot = v;
            }
        }
        if let Some(v) = get("FLIGHTLENS_DAX_DOCS") {
            self.docs.path = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.powerbi.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("powerbi.timeout_seconds must be > 0"));
        }
        if self.powerbi.retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("powerbi.retry_max_attempts must be > 0"));
        }
        if self.powerbi.retry_base_delay_ms > self.powerbi.retry_max_delay_ms {
            return Err(anyhow::anyhow!(
                "powerbi.retry_base_delay_ms must not exceed powerbi.retry_max_delay_ms"
            ));
        }
        if self.powerbi.tables.iter().all(|t| t.trim().is_empty()) {
            return Err(anyhow::anyhow!("powerbi.tables must name at least one table"));
        }
        if self.llm.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("llm.timeout_seconds must be > 0"));
        }
        if self.llm.max_tool_loops == 0 {
            return Err(anyhow::anyhow!("llm.max_tool_loops must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow::anyhow!("llm.temperature must be between 0 and 2"));
        }
        if self.schema.refresh_interval_seconds == 0 {
            return Err(anyhow::anyhow!("schema.refresh_interval_seconds must be > 0"));
        }
        if self.insights.cache_max_entries == 0 || self.insights.cache_ttl_seconds == 0 {
            return Err(anyhow::anyhow!(
                "insights.cache_max_entries and insights.cache_ttl_seconds must be > 0"
            ));
        }
        if self.insights.history_limit == 0 {
            return Err(anyhow::anyhow!("insights.history_limit must be > 0"));
        }
        if self.server.http_timeout_seconds == 0 || self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!(
                "server.http_timeout_seconds and server.http_max_in_flight must be > 0"
            ));
        }
        self.bind_addr()?;
        Ok(())
    }

    /// Required groups that are incomplete. The LLM group is satisfied by either
    /// a full Azure OpenAI deployment or a public OpenAI key.
    pub fn missing_groups(&self) -> Vec<MissingGroup> {
        let mut out = Vec::new();
        let aad = self.credentials().missing();
        if !aad.is_empty() {
            out.push(MissingGroup {
                group: "Azure AD credentials",
                variables: aad,
            });
        }
        let ids = self.dataset().missing();
        if !ids.is_empty() {
            out.push(MissingGroup {
                group: "Power BI ids",
                variables: ids,
            });
        }
        if self.llm.backend().is_none() {
            out.push(MissingGroup {
                group: "LLM deployment",
                variables: self.llm.azure_missing(),
            });
        }
        out
    }

    /// Fails with a readable message naming every incomplete group.
    pub fn require_complete(&self) -> anyhow::Result<()> {
        let missing = self.missing_groups();
        if missing.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = missing.iter().map(ToString::to_string).collect();
        Err(anyhow::anyhow!(
            "missing configuration: {}. Set them in .env, the environment, or {}",
            listed.join("; "),
            default_config_path().display()
        ))
    }

    pub fn credentials(&self) -> AzureAdCredentials {
        AzureAdCredentials {
            tenant_id: self.azure_ad.tenant_id.clone(),
            client_id: self.azure_ad.client_id.clone(),
            client_secret: self.azure_ad.client_secret.clone(),
            authority_host: self.azure_ad.authority_host.clone(),
            scope: self.azure_ad.scope.clone(),
        }
    }

    pub fn dataset(&self) -> DatasetRef {
        DatasetRef {
            workspace_id: self.powerbi.workspace_id.clone(),
            dataset_id: self.powerbi.dataset_id.clone(),
            report_id: self.powerbi.report_id.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.powerbi.retry_max_attempts,
            base_delay: Duration::from_millis(self.powerbi.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.powerbi.retry_max_delay_ms),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server.bind_addr.trim().parse().map_err(|e| {
            anyhow::anyhow!("server.bind_addr {:?} is invalid: {e}", self.server.bind_addr)
        })
    }

    pub fn docs_path(&self) -> Option<PathBuf> {
        self.docs.path.as_deref().map(expand_home)
    }
}

#[cfg(test)]
impl FlightLensConfig {
    /// Defaults with Power BI ids `ws`/`ds`/`rep` filled in.
    pub(crate) fn for_tests() -> Self {
        let mut cfg = Self::default();
        cfg.powerbi.workspace_id = "ws".to_string();
        cfg.powerbi.dataset_id = "ds".to_string();
        cfg.powerbi.report_id = "rep".to_string();
        cfg
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".flightlens").join("config.toml")
}

fn expand_home(path: &str) -> PathBuf {
    let trimmed = path.trim();
    match (trimmed.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(trimmed),
    }
}
