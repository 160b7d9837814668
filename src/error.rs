use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpgError {
    #[error("EPG service URL is not configured")]
    MissingServiceUrl,

    #[error("no channels with EPG identifiers")]
    NoEpgChannels,

    #[error("health check failed with HTTP {0}")]
    Unhealthy(reqwest::StatusCode),

    #[error("EPG request failed with HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed EPG response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("decode task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = EpgError> = std::result::Result<T, E>;
