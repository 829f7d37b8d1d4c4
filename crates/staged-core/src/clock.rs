//! Stage clock
//!
//! Holds the current [`RenderStage`] of one render. Exactly one driver
//! advances it; any number of readers query it or wait on it.
//!
//! # Invariants
//!
//! - The stage never moves backwards; advancing to a stage at or before
//!   the current one is a no-op.
//! - Reaching a stage also reaches every stage before it, so advancing
//!   straight from `Static` to `Dynamic` releases `Runtime` waiters too.

use crate::error::RenderAborted;
use crate::gate::{GateWait, PromiseGate};
use crate::stage::RenderStage;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type StageListener = Box<dyn FnOnce() + Send>;

/// Future returned by [`StageClock::await_stage`]
pub type StageWait = GateWait<(), RenderAborted>;

struct ClockState {
    current: RenderStage,
    listeners: Vec<(RenderStage, StageListener)>,
    aborted: Option<RenderAborted>,
}

struct ClockInner {
    state: Mutex<ClockState>,
    gates: [PromiseGate<(), RenderAborted>; 3],
}

/// Shared handle to the current stage of one render
#[derive(Clone)]
pub struct StageClock {
    inner: Arc<ClockInner>,
}

impl fmt::Debug for StageClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StageClock")
            .field("current", &state.current)
            .field("listeners", &state.listeners.len())
            .field("aborted", &state.aborted)
            .finish()
    }
}

impl Default for StageClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StageClock {
    /// Create a clock at [`RenderStage::Static`]
    #[must_use]
    pub fn new() -> Self {
        let gates = [
            PromiseGate::named("static-stage"),
            PromiseGate::named("runtime-stage"),
            PromiseGate::named("dynamic-stage"),
        ];
        gates[RenderStage::Static.index()].resolve(());

        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    current: RenderStage::Static,
                    listeners: Vec::new(),
                    aborted: None,
                }),
                gates,
            }),
        }
    }

    /// Current stage; never blocks
    #[inline]
    #[must_use]
    pub fn current_stage(&self) -> RenderStage {
        self.inner.state.lock().current
    }

    /// Whether the clock is at or past `stage`
    #[inline]
    #[must_use]
    pub fn has_reached(&self, stage: RenderStage) -> bool {
        self.current_stage() >= stage
    }

    /// Move forward to `target`
    ///
    /// Returns `false` (and changes nothing) when `target` is not ahead of
    /// the current stage. Otherwise releases the waiters and listeners of
    /// every stage up to and including `target`.
    pub fn advance(&self, target: RenderStage) -> bool {
        let (from, ready) = {
            let mut state = self.inner.state.lock();
            if target <= state.current {
                return false;
            }
            let from = state.current;
            state.current = target;

            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.listeners)
                .into_iter()
                .partition(|(stage, _)| *stage <= target);
            state.listeners = waiting;
            (from, ready)
        };

        tracing::debug!(from = %from, to = %target, "render stage advanced");

        for stage in RenderStage::ALL {
            if stage <= target {
                self.inner.gates[stage.index()].resolve(());
            }
        }
        for (_, listener) in ready {
            listener();
        }
        true
    }

    /// Wait until the clock reaches `target`
    ///
    /// Always yields at least once, even if `target` was already reached.
    /// Fails only if the render is aborted before reaching `target`.
    pub fn await_stage(&self, target: RenderStage) -> StageWait {
        self.inner.gates[target.index()].wait()
    }

    /// Resolve with `value` once `stage` is reached
    pub fn delay_until_stage<T>(
        &self,
        stage: RenderStage,
        value: T,
    ) -> impl Future<Output = Result<T, RenderAborted>> {
        let wait = self.await_stage(stage);
        async move {
            wait.await?;
            Ok(value)
        }
    }

    /// Run `listener` when `stage` is reached
    ///
    /// Runs synchronously right away if the stage was already reached.
    /// Listeners registered for the same stage run in registration order.
    /// Listeners still waiting when the render aborts are dropped.
    pub fn on_stage(&self, stage: RenderStage, listener: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.current >= stage {
            drop(state);
            listener();
            return;
        }
        if state.aborted.is_none() {
            state.listeners.push((stage, Box::new(listener)));
        }
    }

    /// Abandon the render
    ///
    /// Every stage not yet reached fails its waiters with
    /// [`RenderAborted`]. Aborting twice keeps the first reason.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let error = RenderAborted::new(reason);
        let current = {
            let mut state = self.inner.state.lock();
            if state.aborted.is_some() {
                return false;
            }
            state.aborted = Some(error.clone());
            state.listeners.clear();
            state.current
        };

        tracing::debug!(stage = %current, reason = %error.reason, "render aborted");

        for stage in RenderStage::ALL {
            if stage > current {
                let gate = &self.inner.gates[stage.index()];
                gate.prevent_unhandled_rejection();
                gate.reject(error.clone());
            }
        }
        true
    }

    /// Abort reason, if the render was aborted
    #[must_use]
    pub fn abort_reason(&self) -> Option<RenderAborted> {
        self.inner.state.lock().aborted.clone()
    }
}
