use fl_powerbi::{ErrorKind, PowerBiError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    PowerBi(#[from] PowerBiError),
}

impl ToolError {
    /// Stable label for the transcript's `{"error": ..., "kind": ...}` payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::PowerBi(e) => match e.kind() {
                ErrorKind::Config => "config",
                ErrorKind::Auth => "auth",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Query => "query",
                ErrorKind::Remote => "remote",
                ErrorKind::Transport => "transport",
            },
        }
    }
}
