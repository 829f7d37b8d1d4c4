//! Error types for staged-stream

/// Failure of a chunk stream
///
/// Cloned to every waiter: each broadcast cursor and every unsealed stage
/// receives the same value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The producing stream failed
    #[error("upstream stream failed: {0}")]
    Upstream(String),

    /// The collector sink went away before the stream ended
    #[error("collector dropped before the stream ended")]
    CollectorDropped,
}

impl StreamError {
    /// Upstream failure with a message
    #[inline]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }
}
