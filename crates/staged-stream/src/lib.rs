//! Staged Stream
//!
//! Chunk plumbing for a staged render's output:
//!
//! - [`tee`] / [`ChunkBroadcast`]: independent readers over one upstream
//! - [`StageChunkCollector`]: per-stage buckets sealed as the
//!   [`StageClock`](staged_core::StageClock) moves
//! - [`StageChunkTransform`]: the same collector as a pass-through stream
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use futures::executor::block_on;
//! use staged_core::{RenderStage, StageClock};
//! use staged_stream::{CollectorOptions, StageChunkCollector};
//!
//! let clock = StageClock::new();
//! let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());
//!
//! sink.write(Bytes::from_static(b"shell"));
//! clock.advance(RenderStage::Runtime);
//! sink.write(Bytes::from_static(b"cookies"));
//! sink.close();
//!
//! let runtime = block_on(chunks.runtime_chunks()).unwrap();
//! assert_eq!(runtime.concat(), Bytes::from_static(b"shellcookies"));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod broadcast;
pub mod collector;
pub mod error;
pub mod transform;

pub use broadcast::{tee, BroadcastCursor, ChunkBroadcast, ChunkResult};
pub use collector::{
    ChunkSink, CollectorOptions, StageChunkCollector, StageChunks, StageChunksWait, StagedChunks,
};
pub use error::StreamError;
pub use transform::StageChunkTransform;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
