//! Pass-through collector
//!
//! [`StageChunkTransform`] forwards every item of the wrapped stream
//! unchanged while recording chunks into a collector. Reaching the end
//! closes the collector; an error fails it.

use crate::broadcast::ChunkResult;
use crate::collector::{ChunkSink, CollectorOptions, StageChunkCollector, StagedChunks};
use futures::stream::{FusedStream, Stream, StreamExt};
use staged_core::StageClock;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stream adapter that records chunks per stage
#[must_use = "streams do nothing unless polled"]
pub struct StageChunkTransform<S> {
    inner: S,
    sink: Option<ChunkSink>,
}

impl<S> fmt::Debug for StageChunkTransform<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageChunkTransform")
            .field("done", &self.sink.is_none())
            .finish_non_exhaustive()
    }
}

impl<S> StageChunkTransform<S>
where
    S: Stream<Item = ChunkResult> + Unpin,
{
    /// Wrap `inner`, attaching a fresh collector to `clock`
    pub fn new(inner: S, clock: &StageClock, options: CollectorOptions) -> (Self, StagedChunks) {
        let (sink, chunks) = StageChunkCollector::attach(clock, options);
        (Self::with_sink(inner, sink), chunks)
    }

    /// Wrap `inner`, recording into an existing sink
    pub fn with_sink(inner: S, sink: ChunkSink) -> Self {
        Self {
            inner,
            sink: Some(sink),
        }
    }
}

impl<S> Stream for StageChunkTransform<S>
where
    S: Stream<Item = ChunkResult> + Unpin,
{
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.sink.is_none() {
            return Poll::Ready(None);
        }

        match self.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(sink) = self.sink.as_ref() {
                    sink.write(chunk.clone());
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                if let Some(sink) = self.sink.take() {
                    sink.fail(error.clone());
                }
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if let Some(sink) = self.sink.take() {
                    sink.close();
                }
                Poll::Ready(None)
            }
        }
    }
}

impl<S> FusedStream for StageChunkTransform<S>
where
    S: Stream<Item = ChunkResult> + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.sink.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use bytes::Bytes;
    use futures::executor::block_on;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use staged_core::RenderStage;

    #[test]
    fn forwards_and_records() {
        let clock = StageClock::new();
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"<html>")),
            Ok(Bytes::from_static(b"</html>")),
        ]);
        let (transform, chunks) =
            StageChunkTransform::new(upstream, &clock, CollectorOptions::default());

        let forwarded: Vec<_> = block_on(transform.collect());
        assert_eq!(forwarded.len(), 2);

        let dynamic = block_on(chunks.dynamic_chunks()).unwrap();
        assert_eq!(dynamic.concat(), Bytes::from_static(b"<html></html>"));
        assert_eq!(block_on(chunks.finished_in()), Ok(RenderStage::Static));
    }

    #[test]
    fn error_is_forwarded_then_stream_ends() {
        let clock = StageClock::new();
        let upstream = stream::iter(vec![Err(StreamError::upstream("boom"))]);
        let (mut transform, chunks) = StageChunkTransform::new(
            upstream,
            &clock,
            CollectorOptions::default().with_prevent_unhandled_rejection(true),
        );

        block_on(async {
            assert_eq!(
                transform.next().await,
                Some(Err(StreamError::upstream("boom")))
            );
            assert!(transform.is_terminated());
            assert_eq!(transform.next().await, None);
        });
        assert_eq!(
            block_on(chunks.static_chunks()),
            Err(StreamError::upstream("boom"))
        );
    }
}
