//! Deterministic single-threaded host
//!
//! [`EventLoop`] is a reference [`HostScheduler`] with a virtual clock.
//! One turn of the loop:
//!
//! 1. drain microtasks (spawned futures run until none can progress)
//! 2. timers phase: every timer due at the start of the phase, ordered by
//!    due time then registration
//! 3. check phase: every immediate queued at the start of the phase
//!
//! Microtasks are drained after every callback. Timers and immediates
//! registered during a phase wait for the next turn, except immediates
//! registered during the timers phase, which run in the same turn's check
//! phase. When nothing is runnable but timers are queued, virtual time
//! jumps to the earliest one.
//!
//! The loop only keeps turning while referenced work is queued, so an
//! unreferenced callback never extends the life of the loop by itself.

use crate::error::LoopError;
use crate::host::{Callback, HostRuntime, HostScheduler, TaskHandle};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, LocalSpawnExt, SpawnError};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

struct TaskSlot {
    id: u64,
    callback: RefCell<Option<Callback>>,
    keep_alive: Cell<bool>,
}

impl TaskSlot {
    fn is_pending(&self) -> bool {
        self.callback.borrow().is_some()
    }

    fn is_live(&self) -> bool {
        self.keep_alive.get() && self.is_pending()
    }
}

/// Handle to a timer or immediate queued on an [`EventLoop`]
#[derive(Clone)]
pub struct LoopTask {
    slot: Rc<TaskSlot>,
}

impl fmt::Debug for LoopTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopTask")
            .field("id", &self.slot.id)
            .field("pending", &self.slot.is_pending())
            .field("keep_alive", &self.slot.keep_alive.get())
            .finish()
    }
}

impl TaskHandle for LoopTask {
    fn clear(&self) {
        let callback = self.slot.callback.borrow_mut().take();
        drop(callback);
    }

    fn set_ref(&self, keep_alive: bool) {
        self.slot.keep_alive.set(keep_alive);
    }

    fn has_ref(&self) -> bool {
        self.slot.is_live()
    }

    fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }
}

type TimerKey = (Duration, u64);

struct LoopShared {
    runtime: HostRuntime,
    now: Cell<Duration>,
    next_id: Cell<u64>,
    ticks: Cell<u64>,
    timers: RefCell<BTreeMap<TimerKey, Rc<TaskSlot>>>,
    immediates: RefCell<VecDeque<Rc<TaskSlot>>>,
}

impl LoopShared {
    fn slot(&self, callback: Callback) -> Rc<TaskSlot> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Rc::new(TaskSlot {
            id,
            callback: RefCell::new(Some(callback)),
            keep_alive: Cell::new(true),
        })
    }

    fn has_live_work(&self) -> bool {
        self.timers.borrow().values().any(|slot| slot.is_live())
            || self.immediates.borrow().iter().any(|slot| slot.is_live())
    }

    /// Jump virtual time forward when nothing can run right now
    fn skip_idle_time(&self) {
        if self.immediates.borrow().iter().any(|slot| slot.is_pending()) {
            return;
        }
        let now = self.now.get();
        let next_due = self.timers.borrow().keys().next().map(|(due, _)| *due);
        if let Some(due) = next_due {
            if due > now {
                tracing::trace!(from = ?now, to = ?due, "virtual time skipped");
                self.now.set(due);
            }
        }
    }

    fn take_due_timers(&self) -> Vec<Rc<TaskSlot>> {
        let mut timers = self.timers.borrow_mut();
        let later = timers.split_off(&(self.now.get(), u64::MAX));
        std::mem::replace(&mut *timers, later)
            .into_values()
            .collect()
    }

    fn take_immediates(&self) -> Vec<Rc<TaskSlot>> {
        self.immediates.borrow_mut().drain(..).collect()
    }
}

impl Drop for LoopShared {
    // Callbacks may own handles back into their own slots
    fn drop(&mut self) {
        let slots = self
            .timers
            .get_mut()
            .values()
            .chain(self.immediates.get_mut().iter());
        for slot in slots {
            let callback = slot.callback.borrow_mut().take();
            drop(callback);
        }
    }
}

/// Cloneable scheduling handle for an [`EventLoop`]
#[derive(Clone)]
pub struct LoopHandle {
    shared: Rc<LoopShared>,
    spawner: LocalSpawner,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("runtime", &self.shared.runtime)
            .field("now", &self.shared.now.get())
            .field("ticks", &self.shared.ticks.get())
            .finish_non_exhaustive()
    }
}

impl LoopHandle {
    /// Current virtual time
    #[inline]
    #[must_use]
    pub fn now(&self) -> Duration {
        self.shared.now.get()
    }

    /// Number of callbacks run so far
    #[inline]
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.get()
    }
}

impl LocalSpawn for LoopHandle {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.spawner.spawn_local_obj(future)
    }

    fn status_local(&self) -> Result<(), SpawnError> {
        self.spawner.status_local()
    }
}

impl HostScheduler for LoopHandle {
    type Timer = LoopTask;
    type Immediate = LoopTask;

    fn runtime(&self) -> HostRuntime {
        self.shared.runtime
    }

    fn set_timeout(&self, delay: Duration, callback: Callback) -> LoopTask {
        let slot = self.shared.slot(callback);
        let due = self
            .shared
            .now
            .get()
            .checked_add(delay)
            .unwrap_or(Duration::MAX);
        self.shared
            .timers
            .borrow_mut()
            .insert((due, slot.id), Rc::clone(&slot));
        LoopTask { slot }
    }

    fn set_immediate(&self, callback: Callback) -> LoopTask {
        let slot = self.shared.slot(callback);
        self.shared
            .immediates
            .borrow_mut()
            .push_back(Rc::clone(&slot));
        LoopTask { slot }
    }
}

/// Deterministic event loop with a virtual clock
pub struct EventLoop {
    handle: LoopHandle,
    pool: LocalPool,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a loop for a full (Node-like) host
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(HostRuntime::Node)
    }

    /// Create a loop reporting the given runtime kind
    #[must_use]
    pub fn with_runtime(runtime: HostRuntime) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            handle: LoopHandle {
                shared: Rc::new(LoopShared {
                    runtime,
                    now: Cell::new(Duration::ZERO),
                    next_id: Cell::new(0),
                    ticks: Cell::new(0),
                    timers: RefCell::new(BTreeMap::new()),
                    immediates: RefCell::new(VecDeque::new()),
                }),
                spawner,
            },
            pool,
        }
    }

    /// Scheduling handle for this loop
    #[inline]
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Current virtual time
    #[inline]
    #[must_use]
    pub fn now(&self) -> Duration {
        self.handle.now()
    }

    /// Number of callbacks run so far
    #[inline]
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.handle.ticks()
    }

    /// Run spawned futures until none can make progress
    pub fn run_microtasks(&mut self) {
        self.pool.run_until_stalled();
    }

    /// Run one turn; returns `false` once no referenced work is left
    pub fn turn(&mut self) -> bool {
        self.run_microtasks();
        if !self.handle.shared.has_live_work() {
            return false;
        }

        self.handle.shared.skip_idle_time();

        for slot in self.handle.shared.take_due_timers() {
            self.run_slot(&slot, "timer");
        }
        for slot in self.handle.shared.take_immediates() {
            self.run_slot(&slot, "immediate");
        }
        true
    }

    /// Turn until idle; returns the number of turns taken
    pub fn run(&mut self) -> usize {
        let mut turns = 0;
        while self.turn() {
            turns += 1;
        }
        turns
    }

    /// Drive the loop until `future` completes
    ///
    /// # Errors
    /// - `LoopError::Stalled` if the loop goes idle first
    /// - `LoopError::Spawn` if the future cannot be spawned
    pub fn run_until<F>(&mut self, future: F) -> Result<F::Output, LoopError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let output = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&output);
        self.handle.spawner.spawn_local(async move {
            let value = future.await;
            *slot.borrow_mut() = Some(value);
        })?;

        loop {
            self.run_microtasks();
            if let Some(value) = output.borrow_mut().take() {
                return Ok(value);
            }
            if !self.turn() {
                let value = output.borrow_mut().take();
                return value.ok_or(LoopError::Stalled {
                    ticks: self.ticks(),
                });
            }
        }
    }

    fn run_slot(&mut self, slot: &TaskSlot, kind: &'static str) {
        let callback = slot.callback.borrow_mut().take();
        if let Some(callback) = callback {
            let ticks = self.handle.shared.ticks.get() + 1;
            self.handle.shared.ticks.set(ticks);
            tracing::trace!(id = slot.id, kind, tick = ticks, "running host callback");
            callback();
            self.run_microtasks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use pretty_assertions::assert_eq;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn push(log: &Log, entry: &'static str) -> Callback {
        let log = Rc::clone(log);
        Box::new(move || log.borrow_mut().push(entry))
    }

    #[test]
    fn microtasks_drain_between_timers() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        let spawn_log = Rc::clone(&log);
        let spawner = host.clone();
        host.set_timeout(
            Duration::ZERO,
            Box::new(move || {
                spawn_log.borrow_mut().push("a");
                let micro_log = Rc::clone(&spawn_log);
                spawner
                    .spawn_local(async move { micro_log.borrow_mut().push("a-micro") })
                    .unwrap();
            }),
        );
        host.set_timeout(Duration::ZERO, push(&log, "b"));

        event_loop.run();
        assert_eq!(*log.borrow(), vec!["a", "a-micro", "b"]);
    }

    #[test]
    fn immediates_from_timer_phase_run_after_the_batch() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        let inner_host = host.clone();
        let inner_log = Rc::clone(&log);
        host.set_timeout(
            Duration::ZERO,
            Box::new(move || {
                inner_log.borrow_mut().push("a");
                inner_host.set_timeout(Duration::ZERO, push(&inner_log, "c"));
                inner_host.set_immediate(push(&inner_log, "i"));
            }),
        );
        host.set_timeout(Duration::ZERO, push(&log, "b"));

        event_loop.run();
        assert_eq!(*log.borrow(), vec!["a", "b", "i", "c"]);
    }

    #[test]
    fn delayed_timers_follow_virtual_time() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        host.set_timeout(Duration::from_millis(10), push(&log, "late"));
        host.set_timeout(Duration::from_millis(5), push(&log, "early"));
        host.set_timeout(Duration::ZERO, push(&log, "now"));

        event_loop.run();
        assert_eq!(*log.borrow(), vec!["now", "early", "late"]);
        assert_eq!(event_loop.now(), Duration::from_millis(10));
        assert_eq!(event_loop.ticks(), 3);
    }

    #[test]
    fn far_future_timer_saturates() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        host.set_timeout(Duration::from_millis(5), push(&log, "soon"));
        event_loop.run();
        host.set_timeout(Duration::MAX, push(&log, "never"));
        host.set_timeout(Duration::ZERO, push(&log, "now"));

        event_loop.run();
        assert_eq!(*log.borrow(), vec!["soon", "now", "never"]);
        assert_eq!(event_loop.now(), Duration::MAX);
    }

    fn cancel_later<H: HostScheduler>(host: &H, log: &Log) -> Callback {
        let timer = host.set_timeout(Duration::ZERO, push(log, "timer"));
        let immediate = host.set_immediate(push(log, "immediate"));
        Box::new(move || {
            timer.clear();
            immediate.clear();
        })
    }

    #[test]
    fn handles_move_into_callbacks() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        let cancel = cancel_later(&host, &log);
        let buffered = crate::deferred::BufferedScheduler::new(host.clone());
        buffered.start_buffering();
        let cancel_buffered = cancel_later(&buffered, &log);
        cancel();
        cancel_buffered();
        buffered.stop_buffering();

        assert_eq!(event_loop.run(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn cleared_callbacks_never_run() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        let timer = host.set_timeout(Duration::ZERO, push(&log, "timer"));
        let immediate = host.set_immediate(push(&log, "immediate"));
        timer.clear();
        immediate.clear();
        assert!(!timer.is_pending());

        assert_eq!(event_loop.run(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn unreferenced_work_does_not_keep_loop_alive() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        let lone = host.set_immediate(push(&log, "unref"));
        lone.set_ref(false);
        assert!(!lone.has_ref());
        event_loop.run();
        assert!(log.borrow().is_empty());

        host.set_immediate(push(&log, "ref"));
        event_loop.run();
        assert_eq!(*log.borrow(), vec!["unref", "ref"]);
    }

    #[test]
    fn run_until_returns_output() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let (tx, rx) = oneshot::channel();
        host.set_timeout(
            Duration::from_millis(3),
            Box::new(move || {
                let _ = tx.send(42);
            }),
        );

        let value = event_loop.run_until(rx).unwrap();
        assert_eq!(value, Ok(42));
    }

    #[test]
    fn run_until_reports_stall() {
        let mut event_loop = EventLoop::new();
        let (_tx, rx) = oneshot::channel::<()>();
        let err = event_loop.run_until(rx).unwrap_err();
        assert!(matches!(err, LoopError::Stalled { ticks: 0 }));
    }
}
