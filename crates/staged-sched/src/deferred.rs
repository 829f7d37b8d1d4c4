//! Deferred immediates
//!
//! [`BufferedScheduler`] wraps a host and, while a buffering window is
//! open, holds back every run-soon registration instead of handing it to
//! the host. Closing the window releases the held callbacks in order.
//! Timers and spawned futures always pass straight through.
//!
//! One scheduler is built per render, so windows of different renders
//! never see each other's callbacks.

use crate::host::{Callback, HostRuntime, HostScheduler, TaskHandle};
use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, SpawnError};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

enum ItemState<I> {
    Queued(Callback),
    Released(I),
    Cleared,
}

struct QueueItem<I> {
    state: RefCell<ItemState<I>>,
    keep_alive: Cell<bool>,
}

impl<I: TaskHandle> QueueItem<I> {
    fn released(&self) -> Option<I> {
        match &*self.state.borrow() {
            ItemState::Released(real) => Some(real.clone()),
            ItemState::Queued(_) | ItemState::Cleared => None,
        }
    }
}

enum Registration<I> {
    Direct(I),
    Deferred(Rc<QueueItem<I>>),
}

/// Run-soon handle from a [`BufferedScheduler`]
///
/// While held back, `clear` and `set_ref` act on the queued entry; after
/// release they forward to the real host registration.
pub struct BufferedImmediate<I> {
    registration: Registration<I>,
}

impl<I: Clone> Clone for BufferedImmediate<I> {
    fn clone(&self) -> Self {
        let registration = match &self.registration {
            Registration::Direct(real) => Registration::Direct(real.clone()),
            Registration::Deferred(item) => Registration::Deferred(Rc::clone(item)),
        };
        Self { registration }
    }
}

impl<I: TaskHandle> fmt::Debug for BufferedImmediate<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.registration {
            Registration::Direct(_) => "direct",
            Registration::Deferred(_) => "deferred",
        };
        f.debug_struct("BufferedImmediate")
            .field("kind", &kind)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<I: TaskHandle> BufferedImmediate<I> {
    /// Whether this registration went through the buffering window
    #[inline]
    #[must_use]
    pub fn was_deferred(&self) -> bool {
        matches!(self.registration, Registration::Deferred(_))
    }
}

impl<I: TaskHandle> TaskHandle for BufferedImmediate<I> {
    fn clear(&self) {
        match &self.registration {
            Registration::Direct(real) => real.clear(),
            Registration::Deferred(item) => {
                if let Some(real) = item.released() {
                    real.clear();
                } else {
                    let previous = item.state.replace(ItemState::Cleared);
                    drop(previous);
                }
            }
        }
    }

    fn set_ref(&self, keep_alive: bool) {
        match &self.registration {
            Registration::Direct(real) => real.set_ref(keep_alive),
            Registration::Deferred(item) => {
                item.keep_alive.set(keep_alive);
                if let Some(real) = item.released() {
                    real.set_ref(keep_alive);
                }
            }
        }
    }

    fn has_ref(&self) -> bool {
        match &self.registration {
            Registration::Direct(real) => real.has_ref(),
            Registration::Deferred(item) => match &*item.state.borrow() {
                ItemState::Queued(_) => item.keep_alive.get(),
                ItemState::Released(real) => real.has_ref(),
                ItemState::Cleared => false,
            },
        }
    }

    fn is_pending(&self) -> bool {
        match &self.registration {
            Registration::Direct(real) => real.is_pending(),
            Registration::Deferred(item) => match &*item.state.borrow() {
                ItemState::Queued(_) => true,
                ItemState::Released(real) => real.is_pending(),
                ItemState::Cleared => false,
            },
        }
    }
}

struct BufferState<I> {
    buffering: bool,
    queue: Vec<Rc<QueueItem<I>>>,
}

/// Host wrapper that can hold back run-soon callbacks
pub struct BufferedScheduler<H: HostScheduler> {
    inner: H,
    state: Rc<RefCell<BufferState<H::Immediate>>>,
}

impl<H: HostScheduler + Clone> Clone for BufferedScheduler<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: Rc::clone(&self.state),
        }
    }
}

impl<H: HostScheduler> fmt::Debug for BufferedScheduler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BufferedScheduler")
            .field("runtime", &self.inner.runtime())
            .field("buffering", &state.buffering)
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

impl<H: HostScheduler> BufferedScheduler<H> {
    /// Wrap `inner`; the window starts closed
    #[must_use]
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            state: Rc::new(RefCell::new(BufferState {
                buffering: false,
                queue: Vec::new(),
            })),
        }
    }

    /// The wrapped host
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Open the buffering window
    ///
    /// Opening an already open window extends it; windows do not nest.
    pub fn start_buffering(&self) {
        let mut state = self.state.borrow_mut();
        if !state.buffering {
            state.buffering = true;
            tracing::debug!("immediate buffering started");
        }
    }

    /// Close the window and release held callbacks in registration order
    ///
    /// Cleared entries are skipped. Entries that were unreferenced while
    /// held are unreferenced on the host as well. Returns the number of
    /// callbacks released; closing a closed window releases nothing.
    pub fn stop_buffering(&self) -> usize {
        let queue = {
            let mut state = self.state.borrow_mut();
            if !state.buffering {
                return 0;
            }
            state.buffering = false;
            std::mem::take(&mut state.queue)
        };

        let mut released = 0;
        for item in queue {
            let ItemState::Queued(callback) = item.state.replace(ItemState::Cleared) else {
                continue;
            };
            let real = self.inner.set_immediate(callback);
            if !item.keep_alive.get() {
                real.set_ref(false);
            }
            item.state.replace(ItemState::Released(real));
            released += 1;
        }

        tracing::debug!(released, "immediate buffering stopped");
        released
    }

    /// Whether the window is open
    #[inline]
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.state.borrow().buffering
    }

    /// Callbacks currently held back (cleared entries excluded)
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.state
            .borrow()
            .queue
            .iter()
            .filter(|item| matches!(&*item.state.borrow(), ItemState::Queued(_)))
            .count()
    }
}

impl<H: HostScheduler> LocalSpawn for BufferedScheduler<H> {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.inner.spawn_local_obj(future)
    }

    fn status_local(&self) -> Result<(), SpawnError> {
        self.inner.status_local()
    }
}

impl<H: HostScheduler> HostScheduler for BufferedScheduler<H> {
    type Timer = H::Timer;
    type Immediate = BufferedImmediate<H::Immediate>;

    fn runtime(&self) -> HostRuntime {
        self.inner.runtime()
    }

    fn set_timeout(&self, delay: Duration, callback: Callback) -> H::Timer {
        self.inner.set_timeout(delay, callback)
    }

    fn set_immediate(&self, callback: Callback) -> Self::Immediate {
        let mut state = self.state.borrow_mut();
        if !state.buffering {
            drop(state);
            return BufferedImmediate {
                registration: Registration::Direct(self.inner.set_immediate(callback)),
            };
        }

        let item = Rc::new(QueueItem {
            state: RefCell::new(ItemState::Queued(callback)),
            keep_alive: Cell::new(true),
        });
        state.queue.push(Rc::clone(&item));
        tracing::trace!(queued = state.queue.len(), "immediate held back");
        BufferedImmediate {
            registration: Registration::Deferred(item),
        }
    }
}
