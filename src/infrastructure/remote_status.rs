use crate::infrastructure::error::InfraError;
use std::fmt;

/// Status taxonomy reported in the `statusCode` field of every remote response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Success,
    InvalidRequest,
    NoAuth,
    Forbidden,
    RequestTimeout,
    TooManyRequests,
    ServerError,
    ServiceUnavailable,
    Unknown(i64),
}

impl RemoteStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            200 => Self::Success,
            400 => Self::InvalidRequest,
            401 => Self::NoAuth,
            403 => Self::Forbidden,
            408 => Self::RequestTimeout,
            429 => Self::TooManyRequests,
            500 => Self::ServerError,
            503 => Self::ServiceUnavailable,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Success => 200,
            Self::InvalidRequest => 400,
            Self::NoAuth => 401,
            Self::Forbidden => 403,
            Self::RequestTimeout => 408,
            Self::TooManyRequests => 429,
            Self::ServerError => 500,
            Self::ServiceUnavailable => 503,
            Self::Unknown(code) => code,
        }
    }

    /// Maps a status onto the error taxonomy. Nothing here retries: auth failures
    /// surface to the caller, which decides whether to prompt for a new login.
    pub fn into_result(self) -> Result<(), InfraError> {
        match self {
            Self::Success => Ok(()),
            Self::InvalidRequest => Err(InfraError::InvalidRequest),
            Self::NoAuth | Self::Forbidden => Err(InfraError::Auth(self)),
            Self::RequestTimeout
            | Self::TooManyRequests
            | Self::ServerError
            | Self::ServiceUnavailable => Err(InfraError::TransientRemote(self)),
            Self::Unknown(code) => Err(InfraError::UnknownStatus(code)),
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::InvalidRequest => "invalid request",
            Self::NoAuth => "not authenticated",
            Self::Forbidden => "forbidden",
            Self::RequestTimeout => "request timed out",
            Self::TooManyRequests => "too many requests",
            Self::ServerError => "server error",
            Self::ServiceUnavailable => "service unavailable",
            Self::Unknown(_) => "unknown status",
        };
        write!(f, "{} {label}", self.code())
    }
}
