use thiserror::Error;

/// Substring the orchestrator uses when a confirmation is requested twice.
pub const CONFIRMATION_ALREADY_REQUESTED: &str = "confirmation already requested";

/// Substring that marks a rejected credential.
const AUTH_FAILURE_MARKER: &str = "403";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("transport timed out: {0}")]
    Timeout(String),
    #[error("orchestrator rejected request: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn message(&self) -> &str {
        match self {
            Self::ConnectionClosed(message)
            | Self::Io(message)
            | Self::Transport(message)
            | Self::Timeout(message)
            | Self::Rejected(message) => message,
        }
    }

    /// Failures the reconnect loop treats as ordinary connectivity loss.
    pub fn is_transport_class(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::Io(_) | Self::Transport(_) | Self::Timeout(_)
        )
    }

    pub fn is_auth_failure(&self) -> bool {
        self.message().contains(AUTH_FAILURE_MARKER)
    }

    pub fn is_confirmation_already_requested(&self) -> bool {
        self.message().to_ascii_lowercase().contains(CONFIRMATION_ALREADY_REQUESTED)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[source] serde_json::Error),
    #[error("handler contract violated: {0}")]
    ContractViolation(String),
    #[error("no handler registered for tool `{0}`")]
    UnknownTool(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Stable name of the failure class, reported back to the tool caller.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "InvalidArguments",
            Self::ContractViolation(_) => "ContractViolation",
            Self::UnknownTool(_) => "UnknownTool",
            Self::Failed(_) => "ToolFailure",
            Self::Other(_) => "Error",
        }
    }
}
