//! Staged render pipeline
//!
//! Drives one render through its stages in three consecutive host ticks:
//!
//! 1. open the immediate buffering window, invoke the renderer, split its
//!    stream into the response and a collector branch
//! 2. advance to `Runtime` (unless skipped), close the window
//! 3. advance to `Dynamic`
//!
//! The collector branch records every chunk under the stage that was
//! current when it arrived. The response branch is handed back untouched.

use crate::config::RenderConfig;
use crate::error::RenderError;
use futures::stream::LocalBoxStream;
use futures::task::LocalSpawnExt;
use staged_core::{RenderStage, StageClock};
use staged_sched::{pipeline_in_sequential_tasks, BufferedScheduler, HostScheduler};
use staged_stream::{
    tee, BroadcastCursor, ChunkResult, ChunkSink, CollectorOptions, StageChunkCollector,
    StagedChunks, StreamError,
};
use staged_validate::{FlightPayload, RuntimePrefetchValidator, ValidationReport};
use std::fmt;
use std::future::Future;

/// Chunk stream produced by a renderer
pub type RenderStream = LocalBoxStream<'static, ChunkResult>;

/// Handed to the renderer for the duration of one render
pub struct RenderContext<H: HostScheduler> {
    /// Stage cursor of this render
    pub clock: StageClock,
    /// Host scheduler with this render's buffering window
    pub scheduler: BufferedScheduler<H>,
}

impl<H: HostScheduler> fmt::Debug for RenderContext<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("clock", &self.clock)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Produces the chunk stream of one render
///
/// Called once, in the first tick. Work that depends on request data
/// should wait for [`RenderStage::Runtime`] on the context's clock, and
/// uncached I/O for [`RenderStage::Dynamic`].
pub trait StagedRenderer {
    /// Start rendering and return the output stream
    ///
    /// # Errors
    /// Any error aborts the render before a stage is advanced.
    fn render<H>(&self, cx: &RenderContext<H>) -> Result<RenderStream, RenderError>
    where
        H: HostScheduler + Clone + 'static;
}

/// A finished staged render
#[derive(Debug)]
pub struct StagedRender {
    /// The full output stream, for the client
    pub response: BroadcastCursor<RenderStream>,
    /// Output grouped by stage
    pub chunks: StagedChunks,
    /// The render's stage cursor, now at `Dynamic`
    pub clock: StageClock,
}

impl StagedRender {
    /// Validate runtime prefetch segments against the collected buckets
    ///
    /// # Errors
    /// Returns `RenderError::Validate` if a bucket failed or cannot be
    /// decoded.
    pub async fn validate(
        &self,
        validator: &RuntimePrefetchValidator,
        initial: &FlightPayload,
    ) -> Result<ValidationReport, RenderError> {
        Ok(validator.validate_staged(initial, &self.chunks).await?)
    }
}

/// Schedule a staged render on `host`
///
/// The three ticks are registered before this returns; the future
/// resolves once the last one ran.
///
/// # Errors
/// - `RenderError::Scheduler` right away if the host has no macrotasks
/// - from the future, whatever the renderer returned
pub fn render_in_stages<H, R>(
    host: &H,
    renderer: R,
    config: &RenderConfig,
) -> Result<impl Future<Output = Result<StagedRender, RenderError>>, RenderError>
where
    H: HostScheduler + Clone + 'static,
    R: StagedRenderer + 'static,
{
    let clock = StageClock::new();
    let options = CollectorOptions::default()
        .with_prevent_unhandled_rejection(config.prevent_unhandled_rejection);
    let (sink, chunks) = StageChunkCollector::attach(&clock, options);
    let cx = RenderContext {
        clock: clock.clone(),
        scheduler: BufferedScheduler::new(host.clone()),
    };

    let buffer = config.buffer_immediates;
    let skip_runtime = config.skip_runtime_stage;
    let (window, runtime_clock, dynamic_clock) =
        (cx.scheduler.clone(), clock.clone(), clock.clone());

    let scheduled = pipeline_in_sequential_tasks(
        host,
        move || {
            if buffer {
                cx.scheduler.start_buffering();
            }
            let started = start_render(&renderer, &cx, sink);
            if let Err(err) = &started {
                cx.scheduler.stop_buffering();
                cx.clock.abort(err.to_string());
            }
            started
        },
        move |response| {
            if !skip_runtime {
                runtime_clock.advance(RenderStage::Runtime);
            }
            let released = window.stop_buffering();
            tracing::debug!(skip_runtime, released, "render reached runtime tick");
            Ok(response)
        },
        move |response| {
            dynamic_clock.advance(RenderStage::Dynamic);
            tracing::info!("render reached dynamic stage");
            Ok(response)
        },
    );
    let tasks = match scheduled {
        Ok(tasks) => tasks,
        Err(err) => {
            chunks.prevent_unhandled_rejection();
            return Err(err.into());
        }
    };

    Ok(async move {
        match tasks.await {
            Ok(response) => Ok(StagedRender {
                response,
                chunks,
                clock,
            }),
            Err(err) => {
                chunks.prevent_unhandled_rejection();
                Err(err.into())
            }
        }
    })
}

fn start_render<H, R>(
    renderer: &R,
    cx: &RenderContext<H>,
    sink: ChunkSink,
) -> Result<BroadcastCursor<RenderStream>, RenderError>
where
    H: HostScheduler + Clone + 'static,
    R: StagedRenderer,
{
    let stream = match renderer.render(cx) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "renderer failed");
            sink.fail(StreamError::upstream(err.to_string()));
            return Err(err);
        }
    };

    let (response, collected) = tee(stream);
    cx.scheduler.spawn_local(async move {
        match sink.consume(collected).await {
            Ok(stage) => tracing::debug!(%stage, "render stream finished"),
            Err(error) => tracing::warn!(%error, "render stream failed"),
        }
    })?;
    tracing::debug!("render started");
    Ok(response)
}
