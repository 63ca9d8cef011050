use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input. Never retried.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Transport, quota or timeout failure of a remote embedding/completion call.
    #[error("Service call failed: {0}")]
    Service(String),

    /// The remote service refused the request itself (bad request, bad credentials).
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Completion output that could not be turned into a resolution.
    #[error("Malformed completion output: {0}")]
    Parse(String),

    /// Corpus unreadable, snapshot corrupt or inconsistent.
    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Only service failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Service(_))
    }

    /// Map a non-success HTTP status from `service`. Client errors other than
    /// 408 and 429 will fail the same way again, so they are not transient.
    pub fn from_http_status(service: &str, status: u16, detail: &str) -> Self {
        let message = format!("{service} service returned {status}: {detail}");
        match status {
            408 | 429 => Error::Service(message),
            400..=499 => Error::Rejected(message),
            _ => Error::Service(message),
        }
    }
}


pub type Result<T> = std::result::Result<T, Error>;
