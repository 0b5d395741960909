//! Single-threaded delayed-task queue.
//!
//! Tasks are ordered by due time, then by scheduling order, so two tasks due
//! at the same instant run first-come first-served. Running a task may
//! schedule or cancel others; a newly scheduled task that is already due runs
//! in the same [`EventLoop::run_due`] pass.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use super::Clock;

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

type Task = Box<dyn FnOnce()>;

struct LoopInner {
    clock: Rc<dyn Clock>,
    /// Keyed by (due, sequence); the sequence doubles as the task id.
    tasks: RefCell<BTreeMap<(Duration, u64), Task>>,
    next_seq: Cell<u64>,
}

/// A cooperative, single-threaded timer queue.
///
/// `EventLoop` is a handle; clones share the same queue.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Create a loop driven by `clock`.
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                clock: Rc::new(clock),
                tasks: RefCell::new(BTreeMap::new()),
                next_seq: Cell::new(0),
            }),
        }
    }

    /// Current time of the loop's clock.
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);

        let due = self.now() + delay;
        self.inner.tasks.borrow_mut().insert((due, seq), Box::new(task));
        trace!(task = seq, due = ?due, "task scheduled");
        TaskId(seq)
    }

    /// Cancel a task that has not run yet. Returns whether it was pending.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.inner.tasks.borrow_mut();
        let key = tasks.keys().find(|(_, seq)| *seq == id.0).copied();
        match key {
            Some(key) => {
                tasks.remove(&key);
                trace!(task = id.0, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Check whether a task is still waiting to run.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.inner.tasks.borrow().keys().any(|(_, seq)| *seq == id.0)
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Due time of the earliest task.
    pub fn next_due(&self) -> Option<Duration> {
        self.inner.tasks.borrow().keys().next().map(|(due, _)| *due)
    }

    /// Run every task that is due now. Returns how many ran.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.now();
            // Pop before running so the task may touch the queue.
            let task = {
                let mut tasks = self.inner.tasks.borrow_mut();
                let first = tasks.keys().next().copied();
                match first {
                    Some(key) if key.0 <= now => tasks.remove(&key).map(|t| (key.1, t)),
                    _ => None,
                }
            };
            let Some((seq, task)) = task else {
                break;
            };
            trace!(task = seq, "task running");
            task();
            ran += 1;
        }
        ran
    }

    /// Sleep until the next task is due and run everything that is due then.
    ///
    /// Returns how many tasks ran; zero when the queue is empty.
    pub fn turn(&self) -> usize {
        match self.next_due() {
            Some(due) => {
                self.inner.clock.sleep_until(due);
                self.run_due()
            }
            None => 0,
        }
    }

    /// Keep turning until no task is left. Returns how many ran in total.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.pending() > 0 {
            ran += self.turn();
        }
        ran
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}
