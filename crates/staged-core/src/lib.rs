//! Staged Core
//!
//! Leaf primitives shared by every part of a staged render:
//!
//! - [`RenderStage`]: the ordered `Static < Runtime < Dynamic` phases
//! - [`PromiseGate`]: an explicit single-assignment result cell with
//!   multi-waiter futures
//! - [`StageClock`]: the per-render stage cursor with monotonic `advance`
//!   and "stage reached" signals
//!
//! # Example
//!
//! ```rust
//! use staged_core::{RenderStage, StageClock};
//!
//! let clock = StageClock::new();
//! let runtime = clock.await_stage(RenderStage::Runtime);
//!
//! clock.advance(RenderStage::Dynamic);
//! assert_eq!(clock.current_stage(), RenderStage::Dynamic);
//! # futures::executor::block_on(runtime).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod clock;
pub mod error;
pub mod gate;
pub mod stage;

pub use clock::{StageClock, StageWait};
pub use error::RenderAborted;
pub use gate::{GateWait, PromiseGate};
pub use stage::{RenderStage, UnknownStage};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
