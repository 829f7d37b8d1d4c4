//! Runtime prefetch validator
//!
//! Checks that every segment flagged for runtime prefetch renders
//! completely from the Runtime and Dynamic stage output alone. For each
//! flagged segment (pre-order, once each):
//!
//! 1. take the Dynamic-stage seed data for everything outside the segment
//! 2. take the Runtime-stage seed data for the segment's subtree
//! 3. wrap that subtree in a boundary whose fallback is a fresh sentinel
//! 4. prerender the combination and look for the sentinel in the prelude
//!
//! A sentinel in the prelude means the segment suspended: a warning, not
//! an error. A prerender that yields no prelude is logged and skipped.
//! Static stage output is never read.

use crate::capability::{chunk_stream, DecodeOptions, PrerenderClient, RscDecoder};
use crate::error::ValidateError;
use crate::payload::{FlightPayload, RscNode, SeedData, SegmentPath};
use serde::{Deserialize, Serialize};
use staged_stream::{StageChunks, StagedChunks};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome for one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FindingOutcome {
    /// The segment rendered without its fallback
    Passed,
    /// The sentinel fallback was rendered
    Suspended {
        /// The sentinel that appeared in the prelude
        sentinel: String,
    },
    /// No prelude could be produced
    NoPrelude {
        /// Why the prerender failed
        reason: String,
    },
}

/// Validation result for one flagged segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFinding {
    /// The checked segment
    pub segment: SegmentPath,
    /// What the check found
    #[serde(flatten)]
    pub outcome: FindingOutcome,
}

/// Findings of one validation pass, in pre-order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One entry per flagged segment
    pub findings: Vec<SegmentFinding>,
}

impl ValidationReport {
    /// Segments that suspended
    pub fn suspended(&self) -> impl Iterator<Item = &SegmentFinding> {
        self.findings
            .iter()
            .filter(|f| matches!(f.outcome, FindingOutcome::Suspended { .. }))
    }

    /// Whether no segment suspended
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.suspended().next().is_none()
    }
}

/// Validates runtime prefetch segments with injected capabilities
#[derive(Clone)]
pub struct RuntimePrefetchValidator {
    decoder: Arc<dyn RscDecoder>,
    prerender: Arc<dyn PrerenderClient>,
    options: DecodeOptions,
}

impl fmt::Debug for RuntimePrefetchValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimePrefetchValidator")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Fresh marker that cannot collide with rendered content
#[must_use]
pub fn new_sentinel() -> String {
    format!("\u{1f}runtime-prefetch-sentinel-{}\u{1f}", Uuid::new_v4())
}

impl RuntimePrefetchValidator {
    /// Create a validator from its two capabilities
    pub fn new(decoder: Arc<dyn RscDecoder>, prerender: Arc<dyn PrerenderClient>) -> Self {
        Self {
            decoder,
            prerender,
            options: DecodeOptions::default(),
        }
    }

    /// Set the options passed to every decode
    #[must_use]
    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate once the Runtime and Dynamic buckets are sealed
    ///
    /// # Errors
    /// - `ValidateError::Stream` if either bucket failed
    /// - `ValidateError::Decode` if either bucket cannot be decoded
    pub async fn validate_staged(
        &self,
        initial: &FlightPayload,
        chunks: &StagedChunks,
    ) -> Result<ValidationReport, ValidateError> {
        let runtime = chunks.runtime_chunks().await?;
        let dynamic = chunks.dynamic_chunks().await?;
        self.validate(initial, &runtime, &dynamic).await
    }

    /// Validate every flagged segment of `initial`'s tree
    ///
    /// # Errors
    /// `ValidateError::Decode` if either bucket cannot be decoded.
    pub async fn validate(
        &self,
        initial: &FlightPayload,
        runtime: &StageChunks,
        dynamic: &StageChunks,
    ) -> Result<ValidationReport, ValidateError> {
        let segments = initial.tree.flagged_segments();
        if segments.is_empty() {
            tracing::debug!("no segments flagged for runtime prefetch validation");
            return Ok(ValidationReport::default());
        }

        let runtime = self
            .decoder
            .decode(chunk_stream(runtime), &self.options)
            .await?;
        let dynamic = self
            .decoder
            .decode(chunk_stream(dynamic), &self.options)
            .await?;

        let mut report = ValidationReport::default();
        for segment in segments {
            let outcome = self.check_segment(initial, &runtime, &dynamic, &segment).await;
            match &outcome {
                FindingOutcome::Passed => {
                    tracing::debug!(segment = %segment, "runtime prefetch segment rendered");
                }
                FindingOutcome::Suspended { .. } => {
                    tracing::warn!(
                        segment = %segment,
                        "segment suspended on data not available from runtime and dynamic stages"
                    );
                }
                FindingOutcome::NoPrelude { reason } => {
                    tracing::warn!(
                        segment = %segment,
                        %reason,
                        "runtime prefetch check produced no prelude; skipping segment"
                    );
                }
            }
            report.findings.push(SegmentFinding { segment, outcome });
        }

        tracing::info!(
            segments = report.findings.len(),
            suspended = report.suspended().count(),
            "runtime prefetch validation finished"
        );
        Ok(report)
    }

    async fn check_segment(
        &self,
        initial: &FlightPayload,
        runtime: &FlightPayload,
        dynamic: &FlightPayload,
        segment: &SegmentPath,
    ) -> FindingOutcome {
        let sentinel = new_sentinel();
        let Some(combined) = combine(initial, runtime, dynamic, segment, &sentinel) else {
            return FindingOutcome::NoPrelude {
                reason: format!("segment {segment} missing from dynamic payload"),
            };
        };

        match self.prerender.prerender(combined).await {
            Ok(prelude) if prelude.text.contains(&sentinel) => {
                FindingOutcome::Suspended { sentinel }
            }
            Ok(_) => FindingOutcome::Passed,
            Err(err) => FindingOutcome::NoPrelude {
                reason: err.to_string(),
            },
        }
    }
}

/// Dynamic seed data with `segment`'s subtree taken from the Runtime
/// payload and guarded by a sentinel boundary
fn combine(
    initial: &FlightPayload,
    runtime: &FlightPayload,
    dynamic: &FlightPayload,
    segment: &SegmentPath,
    sentinel: &str,
) -> Option<FlightPayload> {
    let content = match runtime.seed.find(segment) {
        Some(subtree) => subtree.to_node(),
        None => {
            tracing::debug!(segment = %segment, "segment absent from runtime payload");
            RscNode::pending(segment.to_string())
        }
    };

    let mut seed = dynamic.seed.clone();
    let target = seed.find_mut(segment)?;
    *target = SeedData {
        segment: target.segment.clone(),
        node: RscNode::boundary(RscNode::text(sentinel), content),
        children: Vec::new(),
    };

    Some(FlightPayload {
        tree: initial.tree.clone(),
        seed,
        head: dynamic.head.clone(),
    })
}
