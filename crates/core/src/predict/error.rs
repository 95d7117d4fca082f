use serde::Serialize;

/// Status class the transport maps to a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    ServerError,
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("stock query must be non-empty")]
    InvalidQuery,

    #[error("no listing matches {query:?}")]
    SymbolNotFound { query: String },

    #[error("no price history for {name} ({code})")]
    HistoryUnavailable { code: String, name: String },

    #[error("insufficient price history: have {bars} bars, need {minimum}")]
    InsufficientHistory { bars: usize, minimum: usize },

    #[error("{0:#}")]
    Upstream(anyhow::Error),
}

impl PredictError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PredictError::InvalidQuery => ErrorKind::BadRequest,
            PredictError::SymbolNotFound { .. } | PredictError::HistoryUnavailable { .. } => {
                ErrorKind::NotFound
            }
            PredictError::InsufficientHistory { .. } | PredictError::Upstream(_) => {
                ErrorKind::ServerError
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }
}

/// `{"error": "..."}` payload for failed requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
