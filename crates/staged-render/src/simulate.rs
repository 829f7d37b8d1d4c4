//! Scripted render simulation
//!
//! A [`RenderScript`] lists flight rows per stage. [`ScriptedRenderer`]
//! emits the Static rows during the render tick and releases every later
//! group once the clock reaches its stage, the way a real renderer
//! resolves request data and uncached I/O. [`run_simulation`] drives the
//! whole pipeline on a deterministic [`EventLoop`].

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::pipeline::{
    render_in_stages, RenderContext, RenderStream, StagedRender, StagedRenderer,
};
use bytes::Bytes;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{StreamExt, TryStreamExt};
use futures::task::LocalSpawnExt;
use serde::{Deserialize, Serialize};
use staged_core::{RenderStage, StageClock};
use staged_sched::{EventLoop, HostRuntime, HostScheduler};
use staged_stream::{ChunkResult, StageChunks, StreamError};
use staged_validate::{
    FindingOutcome, FlightPayload, FlightRow, JsonRowDecoder, RscNode, RuntimePrefetchValidator,
    SegmentPath, SegmentTree, TextPrerenderer, ValidationReport,
};
use std::fmt::Write as _;
use std::sync::Arc;

/// Content of one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// Segment position
    pub path: SegmentPath,
    /// Segment content
    pub node: RscNode,
}

/// Rows released when the clock reaches `stage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Stage that releases the rows
    pub stage: RenderStage,
    /// Segments rendered in this stage
    #[serde(default)]
    pub segments: Vec<ScriptSegment>,
}

/// A render described as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderScript {
    /// Route tree, sent first
    pub tree: SegmentTree,
    /// Document head, sent with the tree
    #[serde(default)]
    pub head: Option<RscNode>,
    /// Row groups in emission order
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

impl RenderScript {
    /// Parse a script from JSON
    ///
    /// # Errors
    /// Returns the parse error for malformed scripts.
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// A small route with a personalized section and a feed
    ///
    /// `/account` and `/account/orders` are flagged for runtime prefetch
    /// and render from request data; `/feed` needs uncached I/O.
    #[must_use]
    pub fn demo() -> Self {
        let tree = SegmentTree::leaf("")
            .with_child(
                SegmentTree::leaf("account")
                    .with_runtime_prefetch(true)
                    .with_child(SegmentTree::leaf("orders").with_runtime_prefetch(true)),
            )
            .with_child(SegmentTree::leaf("feed"));
        let account = SegmentPath::root().child("account");

        Self {
            tree,
            head: Some(RscNode::text("<title>demo</title>")),
            steps: vec![
                ScriptStep {
                    stage: RenderStage::Static,
                    segments: vec![ScriptSegment {
                        path: SegmentPath::root(),
                        node: RscNode::text("<nav/>"),
                    }],
                },
                ScriptStep {
                    stage: RenderStage::Runtime,
                    segments: vec![
                        ScriptSegment {
                            path: account.clone(),
                            node: RscNode::text("<h1>hello, ada</h1>"),
                        },
                        ScriptSegment {
                            path: account.child("orders"),
                            node: RscNode::text("<p>3 open orders</p>"),
                        },
                    ],
                },
                ScriptStep {
                    stage: RenderStage::Dynamic,
                    segments: vec![ScriptSegment {
                        path: SegmentPath::root().child("feed"),
                        node: RscNode::text("<ul>latest posts</ul>"),
                    }],
                },
            ],
        }
    }

    /// The payload the client starts from: the tree, nothing rendered
    #[must_use]
    pub fn initial_payload(&self) -> FlightPayload {
        FlightPayload {
            tree: self.tree.clone(),
            ..FlightPayload::default()
        }
    }

    fn encode_step(step: &ScriptStep) -> Result<Vec<Bytes>, RenderError> {
        step.segments
            .iter()
            .map(|segment| {
                FlightRow::Segment {
                    path: segment.path.clone(),
                    node: segment.node.clone(),
                }
                .encode()
                .map_err(RenderError::from)
            })
            .collect()
    }
}

/// Renderer that plays back a [`RenderScript`]
#[derive(Debug, Clone)]
pub struct ScriptedRenderer {
    script: RenderScript,
}

impl ScriptedRenderer {
    /// Play back `script`
    #[must_use]
    pub fn new(script: RenderScript) -> Self {
        Self { script }
    }
}

impl StagedRenderer for ScriptedRenderer {
    fn render<H>(&self, cx: &RenderContext<H>) -> Result<RenderStream, RenderError>
    where
        H: HostScheduler + Clone + 'static,
    {
        let (tx, rx) = mpsc::unbounded();
        let send = |chunk: Bytes| {
            tx.unbounded_send(Ok(chunk))
                .map_err(|err| RenderError::renderer(err.to_string()))
        };

        send(
            FlightRow::Tree {
                tree: self.script.tree.clone(),
            }
            .encode()?,
        )?;
        if let Some(head) = &self.script.head {
            send(FlightRow::Head { node: head.clone() }.encode()?)?;
        }

        let mut later = Vec::new();
        for step in &self.script.steps {
            let rows = RenderScript::encode_step(step)?;
            if step.stage == RenderStage::Static {
                rows.into_iter().try_for_each(send)?;
            } else {
                later.push((step.stage, rows));
            }
        }

        if !later.is_empty() {
            cx.scheduler
                .spawn_local(release_rows(cx.clock.clone(), tx, later))?;
        }
        Ok(rx.boxed_local())
    }
}

async fn release_rows(
    clock: StageClock,
    tx: UnboundedSender<ChunkResult>,
    steps: Vec<(RenderStage, Vec<Bytes>)>,
) {
    for (stage, rows) in steps {
        if let Err(aborted) = clock.await_stage(stage).await {
            // The receiver may be gone as well
            let _ = tx.unbounded_send(Err(StreamError::upstream(aborted.to_string())));
            return;
        }
        tracing::trace!(%stage, rows = rows.len(), "scripted rows released");
        for row in rows {
            if tx.unbounded_send(Ok(row)).is_err() {
                return;
            }
        }
    }
}

/// Size of one stage bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage
    pub stage: RenderStage,
    /// Chunks in the bucket
    pub chunks: usize,
    /// Bytes in the bucket
    pub bytes: usize,
}

impl StageReport {
    fn new(stage: RenderStage, bucket: &StageChunks) -> Self {
        Self {
            stage,
            chunks: bucket.len(),
            bytes: bucket.iter().map(Bytes::len).sum(),
        }
    }
}

/// Outcome of a simulated render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Host the render ran on
    pub runtime: HostRuntime,
    /// Stage the stream ended in
    pub finished_in: RenderStage,
    /// Bucket sizes, one per stage
    pub stages: Vec<StageReport>,
    /// Bytes delivered on the response stream
    pub response_bytes: usize,
    /// Validation findings, when validation ran
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation: Option<ValidationReport>,
}

impl SimulationReport {
    /// Whether no segment suspended
    #[must_use]
    pub fn passed(&self) -> bool {
        self.validation
            .as_ref()
            .map_or(true, ValidationReport::is_clean)
    }

    /// Plain-text summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Staged Render Simulation ({})", self.runtime);
        let _ = writeln!(out, "==========================");
        for stage in &self.stages {
            let _ = writeln!(
                out,
                "  {:<8} {:>3} chunks {:>6} bytes",
                stage.stage, stage.chunks, stage.bytes
            );
        }
        let _ = writeln!(out, "Finished in: {}", self.finished_in);
        let _ = writeln!(out, "Response: {} bytes", self.response_bytes);

        if let Some(validation) = &self.validation {
            let _ = writeln!(out);
            let _ = writeln!(out, "Runtime prefetch validation:");
            if validation.findings.is_empty() {
                let _ = writeln!(out, "  no segments flagged");
            }
            for finding in &validation.findings {
                let verdict = match &finding.outcome {
                    FindingOutcome::Passed => "ok".to_string(),
                    FindingOutcome::Suspended { .. } => {
                        "SUSPENDED (needs data outside runtime and dynamic stages)".to_string()
                    }
                    FindingOutcome::NoPrelude { reason } => {
                        format!("skipped ({reason})")
                    }
                };
                let _ = writeln!(out, "  {}: {verdict}", finding.segment);
            }
        }
        let _ = write!(out, "Status: {}", if self.passed() { "PASSED" } else { "FAILED" });
        out
    }
}

/// Validator with the reference flight decoder and prerenderer
#[must_use]
pub fn reference_validator() -> RuntimePrefetchValidator {
    RuntimePrefetchValidator::new(Arc::new(JsonRowDecoder), Arc::new(TextPrerenderer))
}

/// Play `script` through the staged pipeline on a fresh event loop
///
/// # Errors
/// - `RenderError::Config` for settings that cannot be combined
/// - `RenderError::Scheduler` on a host without macrotasks
/// - any render, stream, or validation failure
pub fn run_simulation(
    config: &RenderConfig,
    script: RenderScript,
) -> Result<SimulationReport, RenderError> {
    config.validate()?;
    let mut event_loop = EventLoop::with_runtime(config.runtime);
    let initial = script.initial_payload();
    let pending = render_in_stages(&event_loop.handle(), ScriptedRenderer::new(script), config)?;
    let validate = config.validate_runtime_prefetch;
    let runtime = config.runtime;

    let report = event_loop.run_until(async move {
        let render = pending.await?;
        let validation = if validate {
            Some(render.validate(&reference_validator(), &initial).await?)
        } else {
            None
        };

        let StagedRender {
            response, chunks, ..
        } = render;
        let body: Vec<Bytes> = response.try_collect().await?;
        let finished_in = chunks.finished_in().await?;
        let mut stages = Vec::with_capacity(RenderStage::ALL.len());
        for stage in RenderStage::ALL {
            stages.push(StageReport::new(stage, &chunks.stage(stage).await?));
        }

        Ok::<_, RenderError>(SimulationReport {
            runtime,
            finished_in,
            stages,
            response_bytes: body.iter().map(Bytes::len).sum(),
            validation,
        })
    })??;

    tracing::info!(
        finished_in = %report.finished_in,
        response_bytes = report.response_bytes,
        ticks = event_loop.ticks(),
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk_counts(report: &SimulationReport) -> Vec<usize> {
        report.stages.iter().map(|s| s.chunks).collect()
    }

    #[test]
    fn demo_fills_each_stage() {
        let report = run_simulation(&RenderConfig::default(), RenderScript::demo()).unwrap();
        assert_eq!(report.finished_in, RenderStage::Dynamic);
        // tree + head + root, then two runtime rows, then the feed
        assert_eq!(chunk_counts(&report), vec![3, 5, 6]);
        assert_eq!(report.response_bytes, report.stages[2].bytes);
        assert!(report.validation.is_none());
        assert!(report.passed());
    }

    #[test]
    fn skipped_runtime_stage_repeats_static_bucket() {
        let config = RenderConfig::default().with_skip_runtime_stage(true);
        let report = run_simulation(&config, RenderScript::demo()).unwrap();
        assert_eq!(chunk_counts(&report), vec![3, 3, 6]);
    }

    #[test]
    fn static_only_script_finishes_in_static() {
        let mut script = RenderScript::demo();
        script.steps.retain(|step| step.stage == RenderStage::Static);
        let report = run_simulation(&RenderConfig::default(), script).unwrap();
        assert_eq!(report.finished_in, RenderStage::Static);
        assert_eq!(chunk_counts(&report), vec![3, 3, 3]);
    }

    #[test]
    fn demo_validates_clean() {
        let config = RenderConfig::default().with_validate_runtime_prefetch(true);
        let report = run_simulation(&config, RenderScript::demo()).unwrap();
        let validation = report.validation.as_ref().unwrap();
        assert_eq!(validation.findings.len(), 2);
        assert!(report.passed());
        assert!(report.generate_text().ends_with("Status: PASSED"));
    }

    #[test]
    fn dynamic_only_segment_fails_validation() {
        let mut script = RenderScript::demo();
        // Move /account/orders to the dynamic stage
        let orders = script.steps[1].segments.pop().unwrap();
        script.steps[2].segments.push(orders);

        let config = RenderConfig::default().with_validate_runtime_prefetch(true);
        let report = run_simulation(&config, script).unwrap();
        assert!(!report.passed());
        assert!(report.generate_text().contains("/account/orders: SUSPENDED"));
    }

    #[test]
    fn edge_runtime_is_unsupported() {
        let config = RenderConfig::default().with_runtime(HostRuntime::Edge);
        let err = run_simulation(&config, RenderScript::demo()).unwrap_err();
        assert!(matches!(err, RenderError::Scheduler(_)));
    }

    #[test]
    fn script_round_trips_through_json() {
        let script = RenderScript::demo();
        let json = serde_json::to_string(&script).unwrap();
        assert_eq!(RenderScript::from_json_str(&json).unwrap(), script);
    }
}
