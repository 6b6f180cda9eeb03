use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PowerBiError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PowerBiError {
    /// Required settings are missing or malformed. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// 401/403 from the engine, or a rejection by the identity provider.
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The engine rejected the query text (HTTP 400).
    #[error("DAX query error ({code}): {message}")]
    Query { code: String, message: String },

    #[error("remote error: status={status} body={body}")]
    Remote { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Auth,
    NotFound,
    Query,
    Remote,
    Transport,
}

/// Status codes retried by the query executor.
pub const TRANSIENT_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

impl PowerBiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Auth(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Query { .. } => ErrorKind::Query,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote { status, .. } if TRANSIENT_STATUS_CODES.contains(status))
    }
}

impl From<reqwest::Error> for PowerBiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
