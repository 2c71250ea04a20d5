use thiserror::Error;

/// Failures talking to the authoritative store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode store response: {0}")]
    Decode(String),

    #[error("store rejected request: {message}")]
    Rejected { message: String },

    #[error("player identity not established")]
    NotAuthenticated,
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("offline reconciliation failed after {attempts} attempts")]
    ReconcileExhausted { attempts: u32 },

    #[error("cannot start a session without an established identity")]
    NotAuthenticated,

    #[error("session already stopped")]
    Stopped,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
