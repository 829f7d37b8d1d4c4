//! One-shot promise gates
//!
//! A [`PromiseGate`] is a single-assignment result slot shared between the
//! code that settles it and any number of waiters. The first
//! `resolve`/`reject` wins; every later write is ignored and reported as
//! such through the returned `bool`.
//!
//! Waiting always yields at least once: polling [`GateWait`] on a gate that
//! is already settled returns `Pending` and wakes itself, so an `.await` on
//! a settled gate still gives other ready work a turn before continuing.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct GateState<T, E> {
    outcome: Option<Result<T, E>>,
    wakers: BTreeMap<u64, Waker>,
    next_waiter: u64,
    observed: bool,
    silenced: bool,
    rejection: Option<String>,
}

struct GateShared<T, E> {
    label: &'static str,
    state: Mutex<GateState<T, E>>,
}

impl<T, E> Drop for GateShared<T, E> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(message) = state.rejection.take() {
            if !state.observed && !state.silenced {
                tracing::warn!(
                    gate = self.label,
                    error = %message,
                    "promise gate rejected but never awaited"
                );
            }
        }
    }
}

/// Single-assignment, multi-waiter result cell
pub struct PromiseGate<T, E> {
    shared: Arc<GateShared<T, E>>,
}

impl<T, E> Clone for PromiseGate<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for PromiseGate<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("PromiseGate")
            .field("label", &self.shared.label)
            .field("status", &status)
            .field("waiters", &state.wakers.len())
            .finish()
    }
}

impl<T: Clone, E: Clone + fmt::Display> Default for PromiseGate<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, E: Clone + fmt::Display> PromiseGate<T, E> {
    /// Create an unnamed pending gate
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::named("gate")
    }

    /// Create a pending gate with a label used in diagnostics
    #[must_use]
    pub fn named(label: &'static str) -> Self {
        Self {
            shared: Arc::new(GateShared {
                label,
                state: Mutex::new(GateState {
                    outcome: None,
                    wakers: BTreeMap::new(),
                    next_waiter: 0,
                    observed: false,
                    silenced: false,
                    rejection: None,
                }),
            }),
        }
    }

    /// Diagnostic label
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.shared.label
    }

    /// Settle the gate with `outcome`
    ///
    /// Returns `true` if this call settled the gate, `false` if it was
    /// already settled (the new outcome is discarded).
    pub fn settle(&self, outcome: Result<T, E>) -> bool {
        let wakers = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            if let Err(error) = &outcome {
                state.rejection = Some(error.to_string());
            }
            state.outcome = Some(outcome);
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers.into_values() {
            waker.wake();
        }
        true
    }

    /// Resolve with `value`; see [`settle`](Self::settle)
    #[inline]
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with `error`; see [`settle`](Self::settle)
    #[inline]
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Whether the gate has been settled either way
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Current outcome without waiting
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Do not warn if this gate is rejected and dropped without a waiter
    pub fn prevent_unhandled_rejection(&self) {
        self.shared.state.lock().silenced = true;
    }

    /// Wait for the outcome
    ///
    /// Creating the waiter marks the gate as observed, so a later
    /// rejection is considered handled.
    #[must_use]
    pub fn wait(&self) -> GateWait<T, E> {
        self.shared.state.lock().observed = true;
        GateWait {
            shared: Arc::clone(&self.shared),
            yielded: false,
            slot: None,
        }
    }
}

/// Future returned by [`PromiseGate::wait`]
#[must_use = "futures do nothing unless polled"]
pub struct GateWait<T, E> {
    shared: Arc<GateShared<T, E>>,
    yielded: bool,
    slot: Option<u64>,
}

impl<T, E> fmt::Debug for GateWait<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateWait")
            .field("label", &self.shared.label)
            .field("yielded", &self.yielded)
            .finish()
    }
}

impl<T: Clone, E: Clone> Future for GateWait<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.shared.state.lock();

        if let Some(outcome) = state.outcome.as_ref() {
            if this.yielded {
                return Poll::Ready(outcome.clone());
            }
        } else {
            let slot = match this.slot {
                Some(slot) => slot,
                None => {
                    let slot = state.next_waiter;
                    state.next_waiter += 1;
                    this.slot = Some(slot);
                    slot
                }
            };
            match state.wakers.get_mut(&slot) {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                Some(waker) => waker.clone_from(cx.waker()),
                None => {
                    state.wakers.insert(slot, cx.waker().clone());
                }
            }
            this.yielded = true;
            return Poll::Pending;
        }

        // Settled before the first poll: yield once
        drop(state);
        this.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

impl<T, E> Drop for GateWait<T, E> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot {
            self.shared.state.lock().wakers.remove(&slot);
        }
    }
}
