use crate::error::{LlmError, Result};
use crate::openai::OpenAiClient;
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};
use async_trait::async_trait;
use std::time::Duration;

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const TOOL_NAME_MAX_LEN: usize = 64;

/// Anything that can answer a chat transcript, optionally requesting tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition])
    -> Result<ChatResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// Azure OpenAI deployment: `{endpoint}/openai/deployments/{deployment}/chat/completions`.
    AzureOpenAi {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
    OpenAi,
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn azure(
        endpoint: &str,
        api_key: &str,
        api_version: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() || deployment.trim().is_empty() || api_version.trim().is_empty() {
            return Err(LlmError::InvalidInput(
                "azure openai endpoint, deployment and api version are required".to_string(),
            ));
        }
        Self::build(
            Provider::AzureOpenAi {
                endpoint: endpoint.to_string(),
                deployment: deployment.trim().to_string(),
                api_version: api_version.trim().to_string(),
            },
            api_key,
            deployment.trim(),
            timeout,
        )
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn openai(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        Self::build(Provider::OpenAi, api_key, model.trim(), timeout)
    }

    fn build(provider: Provider, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            provider,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: None,
            client,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    fn wire_client(&self) -> OpenAiClient {
        match &self.provider {
            Provider::AzureOpenAi {
                endpoint,
                deployment,
                api_version,
            } => OpenAiClient::azure(
                self.client.clone(),
                format!(
                    "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
                ),
                &self.api_key,
                self.temperature,
            ),
            Provider::OpenAi => OpenAiClient::public(
                self.client.clone(),
                OPENAI_CHAT_COMPLETIONS_URL.to_string(),
                &self.api_key,
                &self.model,
                self.temperature,
            ),
        }
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        for tool in tools {
            validate_tool_name(&tool.name)?;
        }
        self.wire_client().chat(messages, tools).await
    }
}

/// Tool names must match `^[a-zA-Z0-9_-]{1,64}$` for both Azure and public OpenAI.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > TOOL_NAME_MAX_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name must be 1..={TOOL_NAME_MAX_LEN} characters: {name:?}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}
