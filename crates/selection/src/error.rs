use thiserror::Error;

/// Local drawing failures. None of these leave the drawing controller in a
/// broken state; they are surfaced as warnings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("a region needs at least {need} vertices, got {have}")]
    InsufficientVertices { have: usize, need: usize },

    #[error("vertex limit of {max} reached")]
    TooManyVertices { max: usize },

    #[error("drawing is not enabled")]
    NotDrawing,
}
