use thiserror::Error;

/// Failure taxonomy shared by every source adapter and the orchestrator.
///
/// The type is `Clone` because a single failed fetch is handed to every caller
/// attached to the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn config(message: impl Into<String>) -> Self {
        FetchError::Config(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        FetchError::Parse(message.into())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

impl From<csv::Error> for FetchError {
    fn from(err: csv::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
