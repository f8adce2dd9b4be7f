use crate::infrastructure::remote_status::RemoteStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("authentication failed ({0}), check credentials")]
    Auth(RemoteStatus),
    #[error("remote rejected the request as invalid, check api data")]
    InvalidRequest,
    #[error("remote temporarily unavailable: {0}")]
    TransientRemote(RemoteStatus),
    #[error("unknown remote status code {0}, check api")]
    UnknownStatus(i64),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected remote payload: {0}")]
    Protocol(String),
    #[error("remote catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("another batch is still being resolved")]
    ResolutionInProgress,
    #[error("a login attempt is already in progress")]
    ReauthenticationInProgress,
    #[error("no entry with id {0}")]
    EntryNotFound(i64),
    #[error("state lock poisoned: {0}")]
    LockPoisoned(String),
}

impl InfraError {
    /// True when the remote rejected the session or credentials.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRemote(_) | Self::Network(_))
    }
}
