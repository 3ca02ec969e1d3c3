use strum::Display;
use thiserror::Error;

use crate::error::Error;

/// Normalized authentication errors across the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Session is not ready")]
    NotReady,
    #[error("Discovery document has no {0}")]
    MissingEndpoint(&'static str),
    #[error("Authorization denied: {error}")]
    AccessDenied {
        error: String,
        description: Option<String>,
    },
    #[error("Authorization cancelled")]
    Cancelled,
    #[error("OAuth state mismatch")]
    StateMismatch,
    #[error("Superseded by a newer login or logout")]
    Superseded,
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Token endpoint rejected request (status {status})")]
    Rejected { status: u16, error: Option<String> },
    #[error("Token set is incomplete")]
    IncompleteTokenSet,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout after {0}ms")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Coarse classification used to decide the session transition for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Storage read/write failed; degrade to the sentinel or a no-op.
    RecoverableIo,
    /// Connectivity, timeout or server-side failure; keep the session.
    TransientNetwork,
    /// The grant is gone; the session must be invalidated.
    TerminalAuth,
    /// Precondition violated by the caller.
    UserError,
    /// Discovery or client configuration cannot support the operation.
    Configuration,
}

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::Serialization(_) => ErrorCategory::RecoverableIo,
            Self::Network(_)
            | Self::Timeout(_)
            | Self::Rejected { .. }
            | Self::InvalidResponse(_)
            | Self::IncompleteTokenSet => ErrorCategory::TransientNetwork,
            Self::ExpiredOrInvalidGrant | Self::AccessDenied { .. } => ErrorCategory::TerminalAuth,
            Self::NotLoggedIn
            | Self::NotReady
            | Self::Cancelled
            | Self::StateMismatch
            | Self::Superseded => ErrorCategory::UserError,
            Self::MissingEndpoint(_) | Self::Unsupported(_) => ErrorCategory::Configuration,
        }
    }

    /// Whether the session has to be dropped because of this error.
    pub fn is_terminal(&self) -> bool {
        self.category() == ErrorCategory::TerminalAuth
    }

    /// Whether the session survives this error and a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientNetwork | ErrorCategory::RecoverableIo
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout(0);
        }
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<AuthError> for Error {
    fn from(error: AuthError) -> Self {
        Error::Auth(error)
    }
}
