use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("HTTP {status} fetching page at offset {offset}")]
    Status { status: u16, offset: u64 },

    #[error("request for page at offset {offset} failed: {source}")]
    Request {
        offset: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed page body at offset {offset}: {reason}")]
    Body { offset: u64, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// True for failures of a page fetch (status, request, or decoding).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IngestError::Status { .. } | IngestError::Request { .. } | IngestError::Body { .. }
        )
    }
}
