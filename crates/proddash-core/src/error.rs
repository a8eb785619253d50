use proddash_shared::ErrorBody;
use serde_json::Value;
use thiserror::Error;

/// Failure as reported by a [`crate::http::Transport`].
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network failure: {0}")]
    Network(String),
    #[error("backend returned HTTP {status}")]
    Status { status: u16, body: Option<Value> },
    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

/// Closed classification the retry policy and the session teardown switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Network,
    Unauthorized,
    Server(u16),
    Client(u16),
    /// 2xx response whose body reported a failure.
    Rejected,
    Decode,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::Server(_))
    }
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::Status { status: 401, .. } => ErrorKind::Unauthorized,
            Self::Status { status, .. } if *status >= 500 => ErrorKind::Server(*status),
            Self::Status { status, .. } => ErrorKind::Client(*status),
            Self::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Backend-supplied `detail` string, when the error body carried one.
    pub fn detail(&self) -> Option<String> {
        let Self::Status {
            body: Some(body), ..
        } = self
        else {
            return None;
        };
        serde_json::from_value::<ErrorBody>(body.clone())
            .ok()
            .and_then(|parsed| parsed.detail_text().map(str::to_string))
    }
}

/// A failed backend call reduced to one user-facing message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Prefers the backend detail over the operation's fallback text.
    pub fn normalize(err: &TransportError, fallback: &str) -> Self {
        let message = err.detail().unwrap_or_else(|| fallback.to_string());
        Self::new(err.kind(), message)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }
}
