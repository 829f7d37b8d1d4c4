//! Error types for staged-core

/// A render was abandoned before reaching a stage
///
/// Delivered to every waiter of a stage the render never reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("render aborted: {reason}")]
pub struct RenderAborted {
    /// Human-readable abort reason
    pub reason: String,
}

impl RenderAborted {
    /// Create a new abort error
    #[inline]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
