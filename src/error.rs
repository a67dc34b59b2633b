use thiserror::Error;

/// Errors raised at the collaborator boundaries (ledger storage, result
/// provider, alert intake). Application glue wraps these in `anyhow`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Empty league/market, non-numeric odds or scores.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Result or stats not published yet; retried on the next run.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("persistence failed after {attempts} attempt(s): {source}")]
    Persistence {
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    #[error("result provider failure: {0}")]
    Provider(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Whether the failure is worth retrying within the same run.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            EngineError::Provider(_) | EngineError::Io(_) => true,
            _ => false,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
