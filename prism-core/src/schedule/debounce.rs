//! Debounced triggering.
//!
//! A [`Debouncer`] turns a burst of triggers into fewer calls of one action.
//! A burst is a run of triggers with less than `delay` between consecutive
//! ones; every trigger restarts the quiet window.
//!
//! | edge       | calls per burst                                   |
//! |------------|---------------------------------------------------|
//! | `Leading`  | one, at the first trigger                         |
//! | `Trailing` | one, `delay` after the last trigger               |
//! | `Both`     | at the first trigger, and again after the burst if it had more than one trigger |
//!
//! With `Leading`, state that changes during the burst after the first call is
//! not picked up until the next burst. `Both` avoids that.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{EventLoop, TaskId};

/// Which end of a burst triggers the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceEdge {
    /// React to the first trigger, swallow the rest of the burst.
    #[default]
    Leading,
    /// React once the burst is over.
    Trailing,
    /// React at the start and, if anything else came in, at the end.
    Both,
}

/// Debounce policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debounce {
    /// Quiet time that ends a burst.
    pub delay: Duration,
    /// Which end of the burst reacts.
    #[serde(default)]
    pub edge: DebounceEdge,
}

impl Debounce {
    /// Leading-edge debounce with the given delay.
    pub fn leading(delay: Duration) -> Self {
        Self {
            delay,
            edge: DebounceEdge::Leading,
        }
    }

    /// Trailing-edge debounce with the given delay.
    pub fn trailing(delay: Duration) -> Self {
        Self {
            delay,
            edge: DebounceEdge::Trailing,
        }
    }

    /// Debounce on both edges.
    pub fn both(delay: Duration) -> Self {
        Self {
            delay,
            edge: DebounceEdge::Both,
        }
    }
}

struct DebouncerInner {
    policy: Debounce,
    event_loop: EventLoop,
    action: Rc<dyn Fn()>,
    timer: Cell<Option<TaskId>>,
    /// A trigger arrived after the leading call of this burst.
    owed: Cell<bool>,
}

/// Coalesces triggers into calls of an action, on an [`EventLoop`].
#[derive(Clone)]
pub struct Debouncer {
    inner: Rc<DebouncerInner>,
}

impl Debouncer {
    /// Debounce `action` with `policy`, timing bursts on `event_loop`.
    pub fn new<F>(policy: Debounce, event_loop: &EventLoop, action: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            inner: Rc::new(DebouncerInner {
                policy,
                event_loop: event_loop.clone(),
                action: Rc::new(action),
                timer: Cell::new(None),
                owed: Cell::new(false),
            }),
        }
    }

    /// The policy in use.
    pub fn policy(&self) -> Debounce {
        self.inner.policy
    }

    /// Register one trigger.
    pub fn trigger(&self) {
        let inner = &self.inner;
        let idle = match inner.timer.take() {
            Some(id) => {
                inner.event_loop.cancel(id);
                false
            }
            None => true,
        };

        let call_now = idle && inner.policy.edge != DebounceEdge::Trailing;
        match inner.policy.edge {
            DebounceEdge::Leading => {}
            DebounceEdge::Trailing => inner.owed.set(true),
            DebounceEdge::Both => {
                if !idle {
                    inner.owed.set(true);
                }
            }
        }

        let weak: Weak<DebouncerInner> = Rc::downgrade(inner);
        let timer = inner.event_loop.schedule_after(inner.policy.delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.timer.set(None);
                if inner.owed.replace(false) {
                    trace!("debounce trailing call");
                    (inner.action)();
                }
            }
        });
        inner.timer.set(Some(timer));

        if call_now {
            trace!("debounce leading call");
            (inner.action)();
        }
    }

    /// True while a burst is open.
    pub fn is_waiting(&self) -> bool {
        self.inner.timer.get().is_some()
    }

    /// Drop the open burst without calling the action.
    pub fn cancel(&self) {
        if let Some(id) = self.inner.timer.take() {
            self.inner.event_loop.cancel(id);
        }
        self.inner.owed.set(false);
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("policy", &self.inner.policy)
            .field("waiting", &self.is_waiting())
            .finish()
    }
}
