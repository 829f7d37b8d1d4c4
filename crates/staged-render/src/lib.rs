//! Staged Render
//!
//! Orchestrates a streaming render through the `Static`, `Runtime` and
//! `Dynamic` stages:
//!
//! - [`render_in_stages`]: one render over three consecutive host ticks,
//!   with per-stage output collection
//! - [`RenderConfig`]: TOML configuration
//! - [`run_simulation`]: a scripted render on the deterministic event loop
//! - [`init_logging`]: tracing subscriber setup for the binary
//!
//! # Example
//!
//! ```rust
//! use staged_core::RenderStage;
//! use staged_render::{run_simulation, RenderConfig, RenderScript};
//!
//! let config = RenderConfig::default().with_validate_runtime_prefetch(true);
//! let report = run_simulation(&config, RenderScript::demo()).unwrap();
//!
//! assert_eq!(report.finished_in, RenderStage::Dynamic);
//! assert!(report.passed());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod simulate;

pub use config::{ConfigError, RenderConfig};
pub use error::RenderError;
pub use logging::{init_logging, LogFormat};
pub use pipeline::{render_in_stages, RenderContext, RenderStream, StagedRender, StagedRenderer};
pub use simulate::{
    reference_validator, run_simulation, RenderScript, ScriptSegment, ScriptStep,
    ScriptedRenderer, SimulationReport, StageReport,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
