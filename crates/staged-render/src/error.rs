//! Error types for staged-render

use crate::config::ConfigError;
use futures::task::SpawnError;
use staged_core::RenderAborted;
use staged_sched::{LoopError, SchedulerError, SequenceError};
use staged_stream::StreamError;
use staged_validate::ValidateError;

/// Failure of a staged render
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The host cannot run a staged render
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The renderer failed to produce a stream
    #[error("renderer failed: {0}")]
    Renderer(String),

    /// The render stream failed
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Runtime prefetch validation could not run
    #[error(transparent)]
    Validate(#[from] ValidateError),

    /// The render was abandoned before reaching a stage
    #[error(transparent)]
    Aborted(#[from] RenderAborted),

    /// The event loop could not drive the render
    #[error(transparent)]
    Loop(#[from] LoopError),

    /// A render task could not be spawned
    #[error("failed to spawn render task: {0}")]
    Spawn(#[from] SpawnError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The host dropped the render before its last stage
    #[error("render abandoned before reaching the dynamic stage")]
    Abandoned,
}

impl RenderError {
    /// Renderer failure with a message
    #[inline]
    pub fn renderer(message: impl Into<String>) -> Self {
        Self::Renderer(message.into())
    }
}

impl From<SequenceError<RenderError>> for RenderError {
    fn from(error: SequenceError<RenderError>) -> Self {
        error.into_step_error().unwrap_or(Self::Abandoned)
    }
}
