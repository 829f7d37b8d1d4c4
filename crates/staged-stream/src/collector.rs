//! Stage chunk collector
//!
//! Attributes every chunk of a render's output to the stage the
//! [`StageClock`] reported when the chunk arrived, and seals one bucket per
//! stage. Buckets only grow: each later stage starts from a copy of the
//! previous stage's bucket.
//!
//! # Seal rules
//!
//! - First chunk observed in stage `S`: every stage before `S` seals empty;
//!   the chunk starts `S`'s bucket with no copy.
//! - Transition from `last` to `S`: `last` and every stage skipped between
//!   them seal with `last`'s bucket; `S` continues from that bucket.
//! - Close: every unsealed stage seals with the final bucket of the last
//!   observed stage (empty if no chunk arrived), and `finished_in`
//!   resolves with the clock's stage at close.
//! - Failure: every unsealed stage and `finished_in` reject with the
//!   stream error.
//!
//! The collector trusts the clock to be monotonic and never re-checks it.

use crate::broadcast::ChunkResult;
use crate::error::StreamError;
use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use staged_core::{GateWait, PromiseGate, RenderStage, StageClock};
use std::fmt;
use std::sync::Arc;

/// Ordered chunks attributed to one stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageChunks {
    chunks: Vec<Bytes>,
}

impl StageChunks {
    /// Number of chunks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk was attributed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in arrival order
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Iterate chunks in arrival order
    pub fn iter(&self) -> std::slice::Iter<'_, Bytes> {
        self.chunks.iter()
    }

    /// Whether `other` starts with every chunk of `self`
    #[must_use]
    pub fn is_prefix_of(&self, other: &StageChunks) -> bool {
        other.chunks.starts_with(&self.chunks)
    }

    /// All chunks joined into one buffer
    #[must_use]
    pub fn concat(&self) -> Bytes {
        let total = self.chunks.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for chunk in &self.chunks {
            joined.extend_from_slice(chunk);
        }
        joined.freeze()
    }
}

impl From<Vec<Bytes>> for StageChunks {
    fn from(chunks: Vec<Bytes>) -> Self {
        Self { chunks }
    }
}

impl IntoIterator for StageChunks {
    type Item = Bytes;
    type IntoIter = std::vec::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}

impl<'a> IntoIterator for &'a StageChunks {
    type Item = &'a Bytes;
    type IntoIter = std::slice::Iter<'a, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

/// Future for one stage's bucket
pub type StageChunksWait = GateWait<StageChunks, StreamError>;

/// Collector behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Do not warn when a stage result is rejected but never awaited
    pub prevent_unhandled_rejection: bool,
}

impl CollectorOptions {
    /// Set `prevent_unhandled_rejection`
    #[inline]
    #[must_use]
    pub fn with_prevent_unhandled_rejection(mut self, prevent: bool) -> Self {
        self.prevent_unhandled_rejection = prevent;
        self
    }
}

/// Result handle: one sealed bucket per stage plus the closing stage
#[derive(Clone)]
pub struct StagedChunks {
    stages: [PromiseGate<StageChunks, StreamError>; 3],
    finished: PromiseGate<RenderStage, StreamError>,
}

impl fmt::Debug for StagedChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedChunks")
            .field("static", &self.stages[0])
            .field("runtime", &self.stages[1])
            .field("dynamic", &self.stages[2])
            .field("finished", &self.finished)
            .finish()
    }
}

impl StagedChunks {
    fn new(options: CollectorOptions) -> Self {
        let handle = Self {
            stages: [
                PromiseGate::named("static-chunks"),
                PromiseGate::named("runtime-chunks"),
                PromiseGate::named("dynamic-chunks"),
            ],
            finished: PromiseGate::named("finished-in"),
        };
        if options.prevent_unhandled_rejection {
            handle.prevent_unhandled_rejection();
        }
        handle
    }

    /// Do not warn if these results are rejected and never awaited
    pub fn prevent_unhandled_rejection(&self) {
        self.stages
            .iter()
            .for_each(PromiseGate::prevent_unhandled_rejection);
        self.finished.prevent_unhandled_rejection();
    }

    /// Wait for `stage`'s bucket
    pub fn stage(&self, stage: RenderStage) -> StageChunksWait {
        self.stages[stage.index()].wait()
    }

    /// Wait for the Static bucket
    pub fn static_chunks(&self) -> StageChunksWait {
        self.stage(RenderStage::Static)
    }

    /// Wait for the Runtime bucket
    pub fn runtime_chunks(&self) -> StageChunksWait {
        self.stage(RenderStage::Runtime)
    }

    /// Wait for the Dynamic bucket
    pub fn dynamic_chunks(&self) -> StageChunksWait {
        self.stage(RenderStage::Dynamic)
    }

    /// Wait for the stage the clock was in when the stream ended
    pub fn finished_in(&self) -> GateWait<RenderStage, StreamError> {
        self.finished.wait()
    }

    /// Whether `stage`'s bucket is final (sealed or failed)
    #[must_use]
    pub fn is_sealed(&self, stage: RenderStage) -> bool {
        self.stages[stage.index()].is_settled()
    }

    /// `stage`'s bucket if already final, without waiting
    #[must_use]
    pub fn peek(&self, stage: RenderStage) -> Option<Result<StageChunks, StreamError>> {
        self.stages[stage.index()].peek()
    }

    fn seal(&self, stage: RenderStage, chunks: StageChunks) {
        let len = chunks.len();
        if self.stages[stage.index()].resolve(chunks) {
            tracing::debug!(stage = %stage, chunks = len, "stage bucket sealed");
        }
    }
}

struct CollectorState {
    last: Option<RenderStage>,
    bucket: Vec<Bytes>,
    finished: bool,
}

struct CollectorCore {
    clock: StageClock,
    state: Mutex<CollectorState>,
    results: StagedChunks,
}

impl CollectorCore {
    fn record(&self, chunk: Bytes) {
        let stage = self.clock.current_stage();
        let mut state = self.state.lock();
        if state.finished {
            tracing::trace!(stage = %stage, "chunk after stream end ignored");
            return;
        }

        match state.last {
            None => {
                for earlier in RenderStage::ALL.into_iter().filter(|s| *s < stage) {
                    self.results.seal(earlier, StageChunks::default());
                }
            }
            Some(last) if last != stage => {
                let snapshot = StageChunks::from(state.bucket.clone());
                for passed in RenderStage::ALL
                    .into_iter()
                    .filter(|s| *s >= last && *s < stage)
                {
                    self.results.seal(passed, snapshot.clone());
                }
            }
            Some(_) => {}
        }

        tracing::trace!(stage = %stage, len = chunk.len(), "chunk collected");
        state.bucket.push(chunk);
        state.last = Some(stage);
    }

    fn close(&self) -> RenderStage {
        let finished_in = self.clock.current_stage();
        let final_bucket = {
            let mut state = self.state.lock();
            if state.finished {
                return finished_in;
            }
            state.finished = true;
            StageChunks::from(std::mem::take(&mut state.bucket))
        };

        for stage in RenderStage::ALL {
            self.results.seal(stage, final_bucket.clone());
        }
        self.results.finished.resolve(finished_in);
        tracing::debug!(finished_in = %finished_in, chunks = final_bucket.len(), "chunk stream closed");
        finished_in
    }

    fn fail(&self, error: &StreamError) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state.bucket.clear();
        }

        for stage in RenderStage::ALL {
            self.results.stages[stage.index()].reject(error.clone());
        }
        self.results.finished.reject(error.clone());
        tracing::debug!(%error, "chunk stream failed");
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

/// Entry point for attaching a collector to a render
#[derive(Debug, Clone, Copy, Default)]
pub struct StageChunkCollector;

impl StageChunkCollector {
    /// Attach to `clock`, returning the chunk sink and the result handle
    #[must_use]
    pub fn attach(clock: &StageClock, options: CollectorOptions) -> (ChunkSink, StagedChunks) {
        let results = StagedChunks::new(options);
        let core = Arc::new(CollectorCore {
            clock: clock.clone(),
            state: Mutex::new(CollectorState {
                last: None,
                bucket: Vec::new(),
                finished: false,
            }),
            results: results.clone(),
        });
        (ChunkSink { core }, results)
    }
}

/// Write side of a collector
///
/// Dropping a sink that was neither closed nor failed fails it with
/// [`StreamError::CollectorDropped`].
pub struct ChunkSink {
    core: Arc<CollectorCore>,
}

impl fmt::Debug for ChunkSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSink")
            .field("finished", &self.core.is_finished())
            .finish_non_exhaustive()
    }
}

impl ChunkSink {
    /// Record one chunk under the clock's current stage
    pub fn write(&self, chunk: Bytes) {
        self.core.record(chunk);
    }

    /// End the stream successfully; returns the closing stage
    pub fn close(self) -> RenderStage {
        self.core.close()
    }

    /// End the stream with `error`
    pub fn fail(self, error: StreamError) {
        self.core.fail(&error);
    }

    /// Read `stream` to the end, then close or fail
    ///
    /// # Errors
    /// Returns the stream's error after failing the collector with it.
    pub async fn consume<S>(self, mut stream: S) -> Result<RenderStage, StreamError>
    where
        S: Stream<Item = ChunkResult> + Unpin,
    {
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => self.write(chunk),
                Err(error) => {
                    self.core.fail(&error);
                    return Err(error);
                }
            }
        }
        Ok(self.close())
    }
}

impl Drop for ChunkSink {
    fn drop(&mut self) {
        self.core.fail(&StreamError::CollectorDropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn bucket(items: &[&'static str]) -> StageChunks {
        items
            .iter()
            .map(|s| Bytes::from_static(s.as_bytes()))
            .collect::<Vec<_>>()
            .into()
    }

    fn chunk(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn end_to_end_stage_buckets() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());

        sink.write(chunk("a"));
        sink.write(chunk("b"));
        clock.advance(RenderStage::Runtime);
        sink.write(chunk("c"));
        clock.advance(RenderStage::Dynamic);
        sink.write(chunk("d"));
        assert_eq!(sink.close(), RenderStage::Dynamic);

        assert_eq!(block_on(chunks.static_chunks()), Ok(bucket(&["a", "b"])));
        assert_eq!(block_on(chunks.runtime_chunks()), Ok(bucket(&["a", "b", "c"])));
        assert_eq!(
            block_on(chunks.dynamic_chunks()),
            Ok(bucket(&["a", "b", "c", "d"]))
        );
        assert_eq!(block_on(chunks.finished_in()), Ok(RenderStage::Dynamic));
    }

    #[test]
    fn static_seals_at_transition_not_at_close() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());

        sink.write(chunk("a"));
        clock.advance(RenderStage::Runtime);
        assert!(!chunks.is_sealed(RenderStage::Static));
        sink.write(chunk("b"));
        assert_eq!(chunks.peek(RenderStage::Static), Some(Ok(bucket(&["a"]))));
        assert!(!chunks.is_sealed(RenderStage::Runtime));
        sink.close();
    }

    #[test]
    fn first_chunk_in_later_stage_seeds_without_copy() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());

        clock.advance(RenderStage::Runtime);
        sink.write(chunk("x"));
        assert_eq!(chunks.peek(RenderStage::Static), Some(Ok(StageChunks::default())));
        sink.close();

        assert_eq!(block_on(chunks.runtime_chunks()), Ok(bucket(&["x"])));
        assert_eq!(block_on(chunks.dynamic_chunks()), Ok(bucket(&["x"])));
        assert_eq!(block_on(chunks.finished_in()), Ok(RenderStage::Runtime));
    }

    #[test]
    fn skipped_runtime_inherits_static_bucket() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());

        sink.write(chunk("a"));
        clock.advance(RenderStage::Dynamic);
        sink.write(chunk("b"));
        sink.close();

        assert_eq!(block_on(chunks.static_chunks()), Ok(bucket(&["a"])));
        assert_eq!(block_on(chunks.runtime_chunks()), Ok(bucket(&["a"])));
        assert_eq!(block_on(chunks.dynamic_chunks()), Ok(bucket(&["a", "b"])));
    }

    #[test]
    fn static_only_stream_fills_every_stage() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());

        sink.write(chunk("only"));
        assert_eq!(sink.close(), RenderStage::Static);

        for stage in RenderStage::ALL {
            assert_eq!(block_on(chunks.stage(stage)), Ok(bucket(&["only"])));
        }
    }

    #[test]
    fn empty_stream_seals_empty() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());
        clock.advance(RenderStage::Dynamic);
        sink.close();

        for stage in RenderStage::ALL {
            assert_eq!(block_on(chunks.stage(stage)), Ok(StageChunks::default()));
        }
        assert_eq!(block_on(chunks.finished_in()), Ok(RenderStage::Dynamic));
    }

    #[test]
    fn stream_error_rejects_unsealed_stages() {
        let clock = StageClock::new();
        let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());
        let upstream = stream::iter(vec![
            Ok(chunk("a")),
            Err(StreamError::upstream("reset")),
        ]);

        clock.advance(RenderStage::Runtime);
        let outcome = block_on(sink.consume(upstream));
        assert_eq!(outcome, Err(StreamError::upstream("reset")));

        assert_eq!(block_on(chunks.static_chunks()), Ok(StageChunks::default()));
        assert_eq!(
            block_on(chunks.runtime_chunks()),
            Err(StreamError::upstream("reset"))
        );
        assert_eq!(
            block_on(chunks.finished_in()),
            Err(StreamError::upstream("reset"))
        );
    }

    #[test]
    fn dropped_sink_fails_pending_stages() {
        let clock = StageClock::new();
        let options = CollectorOptions::default().with_prevent_unhandled_rejection(true);
        let (sink, chunks) = StageChunkCollector::attach(&clock, options);
        drop(sink);

        assert_eq!(
            block_on(chunks.dynamic_chunks()),
            Err(StreamError::CollectorDropped)
        );
    }

    #[test]
    fn concat_and_prefix() {
        let short = bucket(&["ab", "c"]);
        let long = bucket(&["ab", "c", "d"]);
        assert!(short.is_prefix_of(&long));
        assert!(!long.is_prefix_of(&short));
        assert_eq!(long.concat(), Bytes::from_static(b"abcd"));
        assert_eq!(long.len(), 3);
    }
}
