use thiserror::Error;

/// Failures surfaced by the map engine loader and map sessions.
///
/// Errors are `Clone` because one failed load is fanned out to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("map api key is empty")]
    MissingApiKey,
    #[error("map engine failed to load: {0}")]
    LoadFailed(String),
    #[error("map engine could not create a map: {0}")]
    MapCreation(String),
    #[error("map session is closed")]
    SessionClosed,
}

impl EngineError {
    /// Whether calling `ensure_loaded` again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LoadFailed(_))
    }
}
