//! Chunk broadcast
//!
//! One upstream chunk stream, any number of independent readers. Each
//! [`BroadcastCursor`] owns a read position over a shared append-only
//! buffer:
//!
//! - the upstream is polled only when a cursor has read everything
//!   buffered, so the fastest reader drives and slower readers are served
//!   from the buffer
//! - chunks every live cursor has read are reclaimed
//! - an upstream error is delivered once to each cursor, which then ends
//!
//! Upstream wakeups are fanned out to every cursor waiting on new data.

use crate::error::StreamError;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use futures::task::{waker, ArcWake};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Item type of every chunk stream in a staged render
pub type ChunkResult = Result<Bytes, StreamError>;

#[derive(Default)]
struct Fanout {
    waiters: Mutex<Vec<Waker>>,
}

impl Fanout {
    fn register(&self, waker: &Waker) {
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }
}

impl ArcWake for Fanout {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let waiters = std::mem::take(&mut *arc_self.waiters.lock());
        for waiter in waiters {
            waiter.wake();
        }
    }
}

enum Terminal {
    Done,
    Failed(StreamError),
}

#[derive(Clone, Copy)]
struct CursorState {
    position: usize,
    ended: bool,
}

struct BroadcastState<S> {
    upstream: Option<S>,
    buffer: VecDeque<Bytes>,
    base: usize,
    cursors: Vec<Option<CursorState>>,
    terminal: Option<Terminal>,
}

impl<S> BroadcastState<S> {
    fn reclaim(&mut self) {
        let oldest = self
            .cursors
            .iter()
            .flatten()
            .map(|cursor| cursor.position)
            .min()
            .unwrap_or(self.base + self.buffer.len());
        while self.base < oldest && self.buffer.pop_front().is_some() {
            self.base += 1;
        }
    }

    fn add_cursor(&mut self) -> usize {
        self.cursors.push(Some(CursorState {
            position: self.base,
            ended: false,
        }));
        self.cursors.len() - 1
    }
}

struct BroadcastShared<S> {
    state: Mutex<BroadcastState<S>>,
    fanout: Arc<Fanout>,
}

/// Shared source of [`BroadcastCursor`]s over one upstream
pub struct ChunkBroadcast<S> {
    shared: Arc<BroadcastShared<S>>,
}

impl<S> Clone for ChunkBroadcast<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> fmt::Debug for ChunkBroadcast<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ChunkBroadcast")
            .field("buffered", &state.buffer.len())
            .field("cursors", &state.cursors.iter().flatten().count())
            .field("ended", &state.terminal.is_some())
            .finish()
    }
}

impl<S> ChunkBroadcast<S>
where
    S: Stream<Item = ChunkResult> + Unpin,
{
    /// Take ownership of `upstream`
    #[must_use]
    pub fn new(upstream: S) -> Self {
        Self {
            shared: Arc::new(BroadcastShared {
                state: Mutex::new(BroadcastState {
                    upstream: Some(upstream),
                    buffer: VecDeque::new(),
                    base: 0,
                    cursors: Vec::new(),
                    terminal: None,
                }),
                fanout: Arc::default(),
            }),
        }
    }

    /// New reader starting at the oldest chunk still buffered
    #[must_use]
    pub fn subscribe(&self) -> BroadcastCursor<S> {
        let id = self.shared.state.lock().add_cursor();
        BroadcastCursor {
            shared: Arc::clone(&self.shared),
            id,
        }
    }

    /// Chunks currently held for slower readers
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }
}

/// Split `upstream` into two independently consumed streams
pub fn tee<S>(upstream: S) -> (BroadcastCursor<S>, BroadcastCursor<S>)
where
    S: Stream<Item = ChunkResult> + Unpin,
{
    let broadcast = ChunkBroadcast::new(upstream);
    (broadcast.subscribe(), broadcast.subscribe())
}

/// One reader of a [`ChunkBroadcast`]
#[must_use = "streams do nothing unless polled"]
pub struct BroadcastCursor<S> {
    shared: Arc<BroadcastShared<S>>,
    id: usize,
}

impl<S> fmt::Debug for BroadcastCursor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let cursor = state.cursors.get(self.id).copied().flatten();
        f.debug_struct("BroadcastCursor")
            .field("id", &self.id)
            .field("position", &cursor.map(|c| c.position))
            .finish()
    }
}

impl<S> Drop for BroadcastCursor<S> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.cursors.get_mut(self.id) {
            *slot = None;
        }
        state.reclaim();
    }
}

impl<S> Stream for BroadcastCursor<S>
where
    S: Stream<Item = ChunkResult> + Unpin,
{
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut state = this.shared.state.lock();
        let Some(cursor) = state.cursors.get(this.id).copied().flatten() else {
            return Poll::Ready(None);
        };
        if cursor.ended {
            return Poll::Ready(None);
        }

        // Fill the buffer if this cursor has read everything in it
        if cursor.position == state.base + state.buffer.len() && state.terminal.is_none() {
            this.shared.fanout.register(cx.waker());
            let fanout_waker = waker(Arc::clone(&this.shared.fanout));
            let mut upstream_cx = Context::from_waker(&fanout_waker);

            let polled = match state.upstream.as_mut() {
                Some(upstream) => upstream.poll_next_unpin(&mut upstream_cx),
                None => Poll::Ready(None),
            };
            match polled {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    tracing::trace!(len = chunk.len(), "broadcast chunk buffered");
                    state.buffer.push_back(chunk);
                }
                Poll::Ready(Some(Err(error))) => {
                    tracing::debug!(%error, "broadcast upstream failed");
                    state.upstream = None;
                    state.terminal = Some(Terminal::Failed(error));
                }
                Poll::Ready(None) => {
                    state.upstream = None;
                    state.terminal = Some(Terminal::Done);
                }
            }
            // Other cursors may be waiting on the same data
            ArcWake::wake_by_ref(&this.shared.fanout);
        }

        let offset = cursor.position - state.base;
        if let Some(chunk) = state.buffer.get(offset).cloned() {
            if let Some(Some(slot)) = state.cursors.get_mut(this.id) {
                slot.position += 1;
            }
            state.reclaim();
            return Poll::Ready(Some(Ok(chunk)));
        }

        let error = match &state.terminal {
            Some(Terminal::Failed(error)) => Some(error.clone()),
            Some(Terminal::Done) | None => None,
        };
        if let Some(Some(slot)) = state.cursors.get_mut(this.id) {
            slot.ended = true;
        }
        Poll::Ready(error.map(Err))
    }
}
