//! Host scheduling capability
//!
//! The render pipeline never touches global timer APIs. It is handed a
//! [`HostScheduler`] that exposes the two suspension granularities it
//! depends on:
//!
//! - **macrotasks** ([`HostScheduler::set_timeout`]): one callback per host
//!   tick, used to order stage advances against the rest of the queue
//! - **run-soon callbacks** ([`HostScheduler::set_immediate`]): async but
//!   ahead of the next round of timers
//!
//! The two must not be conflated; an implementation that runs immediates
//! with timer granularity breaks the ordering the buffering window relies
//! on.

use futures::task::LocalSpawn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A scheduled callback
pub type Callback = Box<dyn FnOnce() + 'static>;

/// Kind of host the scheduler runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRuntime {
    /// Full host with a macrotask queue
    #[default]
    Node,
    /// Restricted host without a macrotask queue
    Edge,
}

impl HostRuntime {
    /// Whether zero-delay macrotasks can be scheduled
    #[inline]
    #[must_use]
    pub const fn supports_macrotasks(self) -> bool {
        matches!(self, Self::Node)
    }
}

impl fmt::Display for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => f.write_str("node"),
            Self::Edge => f.write_str("edge"),
        }
    }
}

/// Handle to a scheduled callback
pub trait TaskHandle: Clone {
    /// Cancel the callback if it has not run yet
    fn clear(&self);

    /// Whether this registration keeps the host alive
    fn set_ref(&self, keep_alive: bool);

    /// `true` while the callback is pending and keeps the host alive
    fn has_ref(&self) -> bool;

    /// `true` until the callback has run or been cleared
    fn is_pending(&self) -> bool;
}

/// Scheduling capability handed to a render
///
/// Spawned futures (via [`LocalSpawn`]) form the microtask level: they
/// are driven to a stall after every callback.
pub trait HostScheduler: LocalSpawn {
    /// Handle type for macrotasks
    type Timer: TaskHandle + 'static;
    /// Handle type for run-soon callbacks
    type Immediate: TaskHandle + 'static;

    /// Kind of host
    fn runtime(&self) -> HostRuntime;

    /// Schedule `callback` as a macrotask after `delay`
    fn set_timeout(&self, delay: Duration, callback: Callback) -> Self::Timer;

    /// Schedule `callback` to run as soon as possible, still asynchronously
    fn set_immediate(&self, callback: Callback) -> Self::Immediate;
}
