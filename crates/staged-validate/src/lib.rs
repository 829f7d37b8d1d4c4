//! Staged Validate
//!
//! Runtime prefetch validation for staged renders:
//!
//! - [`payload`]: the decoded flight payload model
//! - [`RscDecoder`] / [`PrerenderClient`]: injected capabilities
//! - [`RuntimePrefetchValidator`]: per-segment sentinel checks over the
//!   Runtime and Dynamic buckets
//! - [`flight`]: a newline-delimited JSON format with a reference decoder
//!   and prerenderer

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod capability;
pub mod error;
pub mod flight;
pub mod payload;
pub mod validator;

pub use capability::{chunk_stream, ChunkStream, DecodeOptions, Prelude, PrerenderClient, RscDecoder};
pub use error::ValidateError;
pub use flight::{FlightRow, JsonRowDecoder, TextPrerenderer};
pub use payload::{FlightPayload, RscNode, SeedData, SegmentPath, SegmentTree};
pub use validator::{
    new_sentinel, FindingOutcome, RuntimePrefetchValidator, SegmentFinding, ValidationReport,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
