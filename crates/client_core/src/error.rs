use shared::error::ApiError;
use thiserror::Error;

/// Why a remote call did not succeed. Both variants trigger the same rollback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rejected by server: {0}")]
    Rejected(String),
}

impl RemoteFailure {
    pub fn reason(&self) -> &str {
        match self {
            Self::Transport(reason) | Self::Rejected(reason) => reason,
        }
    }
}

impl From<ApiError> for RemoteFailure {
    fn from(value: ApiError) -> Self {
        Self::Rejected(value.message)
    }
}

impl From<reqwest::Error> for RemoteFailure {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Result of every remote call a controller issues.
pub type MutationResult<T> = Result<T, RemoteFailure>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Remote(#[from] RemoteFailure),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("a {field} mutation is already in flight")]
    GuardRejected { field: &'static str },
}

impl MutationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, Self::GuardRejected { .. })
    }
}
