//! Error types for staged-validate

use staged_stream::StreamError;

/// Failure of a validation capability or its inputs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidateError {
    /// The payload decoder rejected a stage's chunks
    #[error("failed to decode flight payload: {0}")]
    Decode(String),

    /// The prerender client produced no prelude
    #[error("prerender failed: {0}")]
    Prerender(String),

    /// A stage bucket was never sealed
    #[error("stage chunks unavailable: {0}")]
    Stream(#[from] StreamError),
}
