//! Staged Sched
//!
//! Scheduling plumbing for staged renders:
//!
//! - [`HostScheduler`]: the injected host capability (macrotasks,
//!   run-soon callbacks, spawned futures as microtasks)
//! - [`EventLoop`]: a deterministic host with a virtual clock
//! - [`schedule_sequential`] and friends: steps pinned to consecutive
//!   host ticks with fail-fast cancellation
//! - [`BufferedScheduler`]: a per-render window that holds back run-soon
//!   callbacks and replays them in order
//!
//! # Example
//!
//! ```rust
//! use staged_sched::{schedule_in_sequential_tasks, EventLoop};
//!
//! let mut event_loop = EventLoop::new();
//! let tasks = schedule_in_sequential_tasks(
//!     &event_loop.handle(),
//!     || Ok::<_, String>("rendered"),
//!     || Ok(()),
//! )
//! .unwrap();
//!
//! assert_eq!(event_loop.run_until(tasks).unwrap(), Ok("rendered"));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod deferred;
pub mod error;
pub mod event_loop;
pub mod host;
pub mod sequential;

pub use deferred::{BufferedImmediate, BufferedScheduler};
pub use error::{LoopError, SchedulerError, SequenceError};
pub use event_loop::{EventLoop, LoopHandle, LoopTask};
pub use host::{Callback, HostRuntime, HostScheduler, TaskHandle};
pub use sequential::{
    pipeline_in_sequential_tasks, schedule_in_sequential_tasks, schedule_sequential,
    SequentialTasks, Step,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
