use uwan_core::{CallbackError, CoreError};
use uwan_storage::StorageError;
use thiserror::Error;

/// Transport-level failure: the request never produced an HTTP status.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("network error: {0}")]
    Transport(#[from] TransportError),

    #[error("{context} failed ({status})")]
    RemoteStatus { context: &'static str, status: u16 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transform failed: {0}")]
    Transform(CallbackError),

    #[error("no coordinates stored for incident {0}")]
    MissingLocation(String),

    #[error("{0}")]
    Geolocation(String),
}

impl EngineError {
    /// Network failures are the ones that send a submission to the retry queue.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RemoteStatus { .. })
    }
}
