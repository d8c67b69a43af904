use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend answered with `success: false`.
    #[error("{message}")]
    Envelope {
        message: String,
        detail: Option<String>,
    },
    #[error("HTTP {0}: {1}")]
    Http(StatusCode, String),
    /// Token refresh failed, or was skipped because an earlier refresh failed.
    #[error("authentication expired: {0}")]
    AuthExpired(String),
    /// The request was aborted, either explicitly or by a newer request under the same key.
    #[error("request cancelled: {0}")]
    Cancelled(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Cancellations are expected during normal use and should not be reported to users.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::AuthExpired(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http(status, _) => Some(*status),
            Error::Reqwest(err) => err.status(),
            _ => None,
        }
    }
}
