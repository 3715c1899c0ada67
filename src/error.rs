use axum::http::StatusCode;
use thiserror::Error;

use crate::upstream::UpstreamError;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Terminal outcomes of one relay invocation. None of them are retried.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing url parameter")]
    MissingTarget,

    #[error("Invalid url: {0}")]
    InvalidTarget(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden host: {0}")]
    BlockedHost(String),

    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingTarget | ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::BlockedHost(_) => StatusCode::FORBIDDEN,
            ProxyError::Upstream(_) | ProxyError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
