//! Observer Registry
//!
//! Every observable artifact owns one registry. Handlers are kept in
//! registration order and are delivered to in that order, synchronously,
//! from inside the mutating call.
//!
//! # Handler isolation
//!
//! A handler that panics must not stop delivery to the handlers registered
//! after it, and must not unwind through the mutation that emitted the event.
//! Each handler runs under `catch_unwind`; a failure is logged with
//! `tracing::error!` and counted, and delivery moves on.
//!
//! # Unregistering during delivery
//!
//! Delivery works on a snapshot of the handler list, so handlers may call
//! `on`/`off` freely. A handler removed while an event is being delivered is
//! skipped if its turn has not come yet; a torn-down view never hears about
//! an event after its teardown returns.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::error;

use super::ListenerId;

/// The kinds of notification an artifact can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A record was inserted, or merged into an existing member.
    Add,
    /// A record left the membership.
    Remove,
    /// The whole membership was replaced.
    Reset,
    /// The order of the membership changed.
    Sort,
    /// Attributes of a record or model changed in place.
    Changed,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Add,
        EventKind::Remove,
        EventKind::Reset,
        EventKind::Sort,
        EventKind::Changed,
    ];

    /// The event name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Remove => "remove",
            EventKind::Reset => "reset",
            EventKind::Sort => "sort",
            EventKind::Changed => "changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event that can be routed by kind.
pub trait Event {
    /// The kind used to match handlers registered with [`ObserverRegistry::on`].
    fn kind(&self) -> EventKind;
}

type Handler<E> = Rc<dyn Fn(&E)>;

struct Listener<E> {
    id: ListenerId,
    /// `None` listens to every kind.
    kind: Option<EventKind>,
    handler: Handler<E>,
}

/// Registration-ordered list of event handlers.
pub struct ObserverRegistry<E> {
    listeners: RefCell<Vec<Listener<E>>>,
    failures: Cell<usize>,
}

impl<E: Event> ObserverRegistry<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            failures: Cell::new(0),
        }
    }

    /// Register a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        self.register(Some(kind), Rc::new(handler))
    }

    /// Register a handler for every kind of event.
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        self.register(None, Rc::new(handler))
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler<E>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners
            .borrow_mut()
            .push(Listener { id, kind, handler });
        id
    }

    /// Remove a handler.
    ///
    /// Returns false if the id was not registered here.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Check whether a handler is still registered.
    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.borrow().iter().any(|l| l.id == id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// True if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Number of handler invocations that panicked so far.
    pub fn failures(&self) -> usize {
        self.failures.get()
    }

    /// Deliver `event` to every matching handler in registration order.
    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        let snapshot: SmallVec<[(ListenerId, Handler<E>); 8]> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.kind.map_or(true, |k| k == kind))
            .map(|l| (l.id, Rc::clone(&l.handler)))
            .collect();

        for (id, handler) in snapshot {
            if !self.contains(id) {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            if let Err(payload) = outcome {
                self.failures.set(self.failures.get() + 1);
                error!(
                    listener = id.raw(),
                    event = %kind,
                    reason = panic_message(payload.as_ref()),
                    "event handler panicked"
                );
            }
        }
    }
}

impl<E: Event> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("listeners", &self.listeners.borrow().len())
            .field("failures", &self.failures.get())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
