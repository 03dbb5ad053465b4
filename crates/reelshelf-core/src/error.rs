use thiserror::Error;

/// Failures of the client-local store. Callers in this crate log these and carry on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage I/O failed for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("quota exceeded writing '{key}': {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { key: String, needed: u64, quota: u64 },

    #[error("invalid storage key: '{0}'")]
    InvalidKey(String),
}

/// Failures of a single auto-release poll. Never fatal to the poller.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("endpoint reported failure: {}", .0.as_deref().unwrap_or("no message"))]
    Rejected(Option<String>),
}
