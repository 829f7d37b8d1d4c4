//! Error types for staged-sched

use crate::host::HostRuntime;
use futures::task::SpawnError;

/// Misuse of the scheduling primitives
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The host has no macrotask queue
    #[error("sequential tasks are not supported in the {runtime} runtime")]
    Unsupported {
        /// Host that rejected the call
        runtime: HostRuntime,
    },

    /// No steps were given
    #[error("a task sequence needs at least one step")]
    EmptySequence,
}

/// Failure of a scheduled task sequence
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError<E> {
    /// A step failed; later steps were cancelled
    #[error("step {index} failed: {source}")]
    Step {
        /// Zero-based step position
        index: usize,
        /// Error returned by the step
        source: E,
    },

    /// The host dropped the sequence before its last step ran
    #[error("task sequence abandoned before completion")]
    Abandoned,
}

impl<E> SequenceError<E> {
    /// Index of the failing step, if a step failed
    #[inline]
    #[must_use]
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::Step { index, .. } => Some(*index),
            Self::Abandoned => None,
        }
    }

    /// The original step error, if a step failed
    #[must_use]
    pub fn into_step_error(self) -> Option<E> {
        match self {
            Self::Step { source, .. } => Some(source),
            Self::Abandoned => None,
        }
    }
}

/// Failure while driving an [`EventLoop`](crate::EventLoop)
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The loop ran out of referenced work first
    #[error("event loop went idle after {ticks} ticks before the future completed")]
    Stalled {
        /// Callbacks run before going idle
        ticks: u64,
    },

    /// The future could not be spawned
    #[error("failed to spawn onto the event loop: {0}")]
    Spawn(#[from] SpawnError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_names_runtime() {
        let err = SchedulerError::Unsupported {
            runtime: HostRuntime::Edge,
        };
        assert_eq!(
            err.to_string(),
            "sequential tasks are not supported in the edge runtime"
        );
    }

    #[test]
    fn step_error_keeps_original() {
        let err: SequenceError<String> = SequenceError::Step {
            index: 1,
            source: "boom".to_string(),
        };
        assert_eq!(err.step_index(), Some(1));
        assert_eq!(err.to_string(), "step 1 failed: boom");
        assert_eq!(err.into_step_error(), Some("boom".to_string()));
        assert_eq!(SequenceError::<String>::Abandoned.into_step_error(), None);
    }
}
