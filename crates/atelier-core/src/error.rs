use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtelierError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{backend} unavailable: {detail}")]
    BackendUnavailable { backend: String, detail: String },
    #[error("{backend} returned a malformed response: {detail}")]
    MalformedResponse { backend: String, detail: String },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AtelierError {
    pub fn unavailable(backend: &str, detail: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn malformed(backend: &str, detail: impl ToString) -> Self {
        Self::MalformedResponse {
            backend: backend.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Failures the requester sees as a generic "backend failed" notice.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::MalformedResponse { .. } | Self::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AtelierError>;
