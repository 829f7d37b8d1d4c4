//! Sequential tasks
//!
//! Runs a fixed list of steps one per host tick. All steps are registered
//! as zero-delay macrotasks in a single call, so nothing the caller
//! schedules afterwards can slip in between two steps.
//!
//! - [`schedule_sequential`]: N steps, resolves with the last value
//! - [`schedule_in_sequential_tasks`]: render then followup, resolves with
//!   the render's value once the followup ran
//! - [`pipeline_in_sequential_tasks`]: three steps, each fed the value of
//!   the one before
//!
//! A step that fails clears every step registered after it and settles
//! the sequence with its error.

use crate::error::{SchedulerError, SequenceError};
use crate::host::{HostScheduler, TaskHandle};
use futures::channel::oneshot;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// One step of a homogeneous sequence
pub type Step<T, E> = Box<dyn FnOnce() -> Result<T, E> + 'static>;

/// Internal step form: only the last step yields the sequence value
type RawStep<T, E> = Box<dyn FnOnce() -> Result<Option<T>, E> + 'static>;

type Outcome<T, E> = Result<T, SequenceError<E>>;

/// Future settled when a task sequence finishes or fails
#[must_use = "futures do nothing unless polled"]
pub struct SequentialTasks<T, E> {
    receiver: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> fmt::Debug for SequentialTasks<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialTasks").finish_non_exhaustive()
    }
}

impl<T, E> Future for SequentialTasks<T, E> {
    type Output = Outcome<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(SequenceError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Sequence<T, E, Timer> {
    timers: RefCell<Vec<Timer>>,
    sender: RefCell<Option<oneshot::Sender<Outcome<T, E>>>>,
}

impl<T, E, Timer: TaskHandle> Sequence<T, E, Timer> {
    fn settle(&self, outcome: Outcome<T, E>) {
        let sender = self.sender.borrow_mut().take();
        if let Some(sender) = sender {
            // The caller may have dropped the future; nothing to report then
            let _ = sender.send(outcome);
        }
    }

    fn fail(&self, index: usize, error: E) {
        let cancelled = {
            let timers = self.timers.borrow();
            let later = timers.get(index + 1..).unwrap_or_default();
            later.iter().for_each(TaskHandle::clear);
            later.len()
        };
        tracing::debug!(index, cancelled, "task sequence step failed");
        self.settle(Err(SequenceError::Step {
            index,
            source: error,
        }));
    }
}

fn ensure_macrotasks<H: HostScheduler>(host: &H) -> Result<(), SchedulerError> {
    let runtime = host.runtime();
    if runtime.supports_macrotasks() {
        Ok(())
    } else {
        Err(SchedulerError::Unsupported { runtime })
    }
}

fn register<H, T, E>(
    host: &H,
    steps: Vec<RawStep<T, E>>,
) -> Result<SequentialTasks<T, E>, SchedulerError>
where
    H: HostScheduler,
    T: 'static,
    E: 'static,
{
    ensure_macrotasks(host)?;
    let Some(last) = steps.len().checked_sub(1) else {
        return Err(SchedulerError::EmptySequence);
    };

    let (sender, receiver) = oneshot::channel();
    let sequence = Rc::new(Sequence {
        timers: RefCell::new(Vec::with_capacity(steps.len())),
        sender: RefCell::new(Some(sender)),
    });

    let timers = steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            let sequence = Rc::clone(&sequence);
            host.set_timeout(
                Duration::ZERO,
                Box::new(move || {
                    tracing::trace!(index, "running sequential step");
                    match step() {
                        Ok(Some(value)) if index == last => sequence.settle(Ok(value)),
                        Ok(_) => {}
                        Err(error) => sequence.fail(index, error),
                    }
                }),
            )
        })
        .collect();
    *sequence.timers.borrow_mut() = timers;

    tracing::debug!(steps = last + 1, "scheduled task sequence");
    Ok(SequentialTasks { receiver })
}

/// Run `steps` one per host tick
///
/// Resolves with the value of the last step.
///
/// # Errors
/// - `SchedulerError::Unsupported` if the host has no macrotask queue
/// - `SchedulerError::EmptySequence` if `steps` is empty
pub fn schedule_sequential<H, T, E>(
    host: &H,
    steps: Vec<Step<T, E>>,
) -> Result<SequentialTasks<T, E>, SchedulerError>
where
    H: HostScheduler,
    T: 'static,
    E: 'static,
{
    let raw = steps
        .into_iter()
        .map(|step| -> RawStep<T, E> { Box::new(move || step().map(Some)) })
        .collect();
    register(host, raw)
}

/// Run `render` in one tick and `followup` in the next
///
/// Resolves with the value of `render` once `followup` has run.
///
/// # Errors
/// `SchedulerError::Unsupported` if the host has no macrotask queue.
pub fn schedule_in_sequential_tasks<H, R, E>(
    host: &H,
    render: impl FnOnce() -> Result<R, E> + 'static,
    followup: impl FnOnce() -> Result<(), E> + 'static,
) -> Result<SequentialTasks<R, E>, SchedulerError>
where
    H: HostScheduler,
    R: 'static,
    E: 'static,
{
    let slot = Rc::new(RefCell::new(None));
    let stash = Rc::clone(&slot);

    let steps: Vec<RawStep<R, E>> = vec![
        Box::new(move || {
            let value = render()?;
            *stash.borrow_mut() = Some(value);
            Ok(None)
        }),
        Box::new(move || {
            followup()?;
            Ok(slot.borrow_mut().take())
        }),
    ];
    register(host, steps)
}

/// Run three steps in three ticks, feeding each the previous value
///
/// Resolves with the value of `three`.
///
/// # Errors
/// `SchedulerError::Unsupported` if the host has no macrotask queue.
pub fn pipeline_in_sequential_tasks<H, A, B, C, E>(
    host: &H,
    one: impl FnOnce() -> Result<A, E> + 'static,
    two: impl FnOnce(A) -> Result<B, E> + 'static,
    three: impl FnOnce(B) -> Result<C, E> + 'static,
) -> Result<SequentialTasks<C, E>, SchedulerError>
where
    H: HostScheduler,
    A: 'static,
    B: 'static,
    C: 'static,
    E: 'static,
{
    let first = Rc::new(RefCell::new(None));
    let second = Rc::new(RefCell::new(None));
    let (first_in, second_in) = (Rc::clone(&first), Rc::clone(&second));

    let steps: Vec<RawStep<C, E>> = vec![
        Box::new(move || {
            let value = one()?;
            *first_in.borrow_mut() = Some(value);
            Ok(None)
        }),
        Box::new(move || {
            let input = first.borrow_mut().take();
            if let Some(input) = input {
                let value = two(input)?;
                *second_in.borrow_mut() = Some(value);
            }
            Ok(None)
        }),
        Box::new(move || {
            let input = second.borrow_mut().take();
            match input {
                Some(input) => three(input).map(Some),
                None => Ok(None),
            }
        }),
    ];
    register(host, steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::host::HostRuntime;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging_step(log: &Log, tag: &str, value: u32) -> Step<u32, String> {
        let log = Rc::clone(log);
        let tag = tag.to_string();
        Box::new(move || {
            log.borrow_mut().push(tag);
            Ok(value)
        })
    }

    #[test]
    fn steps_each_get_their_own_tick() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let log: Log = Rc::default();

        let tasks = schedule_sequential(
            &host,
            vec![
                logging_step(&log, "1", 1),
                logging_step(&log, "2", 2),
                logging_step(&log, "3", 3),
            ],
        )
        .unwrap();

        let external = Rc::clone(&log);
        host.set_timeout(
            Duration::ZERO,
            Box::new(move || external.borrow_mut().push("external".into())),
        );

        let result = event_loop.run_until(tasks).unwrap();
        assert_eq!(result, Ok(3));
        assert_eq!(*log.borrow(), vec!["1", "2", "3", "external"]);
        assert_eq!(event_loop.ticks(), 4);
    }

    #[test]
    fn failing_step_cancels_the_rest() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let later_runs = Rc::new(Cell::new(0));

        let mut steps: Vec<Step<u32, String>> = vec![Box::new(|| Err("render failed".into()))];
        for _ in 0..2 {
            let counter = Rc::clone(&later_runs);
            steps.push(Box::new(move || {
                counter.set(counter.get() + 1);
                Ok(0)
            }));
        }

        let tasks = schedule_sequential(&host, steps).unwrap();
        let err = event_loop.run_until(tasks).unwrap().unwrap_err();
        event_loop.run();

        assert_eq!(later_runs.get(), 0);
        assert_eq!(err.step_index(), Some(0));
        assert_eq!(err.into_step_error(), Some("render failed".to_string()));
    }

    #[test]
    fn render_value_resolves_after_followup() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let followup_ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&followup_ran);

        let tasks = schedule_in_sequential_tasks(
            &host,
            || Ok::<_, String>("stream"),
            move || {
                flag.set(true);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(event_loop.run_until(tasks).unwrap(), Ok("stream"));
        assert!(followup_ran.get());
    }

    #[test]
    fn pipeline_threads_values_through() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();

        let tasks = pipeline_in_sequential_tasks(
            &host,
            || Ok::<_, String>(2),
            |a| Ok(a * 10),
            |b| Ok(format!("value {b}")),
        )
        .unwrap();

        assert_eq!(event_loop.run_until(tasks).unwrap(), Ok("value 20".to_string()));
    }

    #[test]
    fn pipeline_middle_failure_skips_last() {
        let mut event_loop = EventLoop::new();
        let host = event_loop.handle();
        let third_ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&third_ran);

        let tasks = pipeline_in_sequential_tasks(
            &host,
            || Ok::<_, String>(1),
            |_| Err::<u32, _>("middle".to_string()),
            move |_| {
                flag.set(true);
                Ok(())
            },
        )
        .unwrap();

        let err = event_loop.run_until(tasks).unwrap().unwrap_err();
        assert_eq!(err.step_index(), Some(1));
        assert!(!third_ran.get());
    }

    #[test]
    fn edge_runtime_is_rejected() {
        let event_loop = EventLoop::with_runtime(HostRuntime::Edge);
        let host = event_loop.handle();
        let err = schedule_sequential::<_, u32, String>(&host, vec![Box::new(|| Ok(1))])
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::Unsupported {
                runtime: HostRuntime::Edge
            }
        );
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let event_loop = EventLoop::new();
        let err = schedule_sequential::<_, u32, String>(&event_loop.handle(), Vec::new())
            .unwrap_err();
        assert_eq!(err, SchedulerError::EmptySequence);
    }

    #[test]
    fn dropped_loop_abandons_sequence() {
        let event_loop = EventLoop::new();
        let tasks =
            schedule_sequential::<_, u32, String>(&event_loop.handle(), vec![Box::new(|| Ok(1))])
                .unwrap();
        drop(event_loop);
        let outcome = futures::executor::block_on(tasks);
        assert_eq!(outcome, Err(SequenceError::Abandoned));
    }
}
