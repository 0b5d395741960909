//! Computed Model Implementation
//!
//! A ComputedModel is an attribute bag whose every attribute is a pure
//! function of a declared set of sources. Attributes cannot be set from the
//! outside. Whenever a source reports any change, every attribute function
//! is re-run against the current state of all sources, and the model emits a
//! single `changed` naming the attributes whose value moved.
//!
//! # Failure
//!
//! A recomputation is all-or-nothing: if any attribute function fails, no
//! attribute is updated and the error is returned (or logged, when the
//! recomputation was triggered by a source).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::sources::{SourceHandle, Sources, Subscriptions};
use crate::error::Result;
use crate::reactive::{ArtifactId, Event, EventKind, ListenerId, ObserverRegistry, RecomputeContext};
use crate::record::{Attributes, Value};
use crate::schedule::{Debounce, Debouncer, EventLoop};

/// A computed attribute.
pub type AttributeFn = Rc<dyn Fn(&Sources) -> Result<Value>>;

/// Notification that computed attributes changed.
#[derive(Debug, Clone)]
pub struct ModelEvent {
    /// Names of the attributes whose value changed, in declaration order.
    pub keys: Vec<String>,
}

impl Event for ModelEvent {
    fn kind(&self) -> EventKind {
        EventKind::Changed
    }
}

/// Builder for a [`ComputedModel`].
pub struct ModelBuilder {
    name: String,
    sources: Sources,
    attributes: IndexMap<String, AttributeFn>,
    debounce: Option<(Debounce, EventLoop)>,
}

impl ModelBuilder {
    /// Add a named source.
    pub fn source(mut self, name: impl Into<String>, source: impl Into<SourceHandle>) -> Self {
        self.sources.insert(name, source);
        self
    }

    /// Add a set of sources.
    pub fn sources(mut self, sources: Sources) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Declare a computed attribute.
    pub fn attribute<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Sources) -> Result<Value> + 'static,
    {
        self.attributes.insert(name.into(), Rc::new(compute));
        self
    }

    /// Debounce source-triggered recomputation on `event_loop`.
    pub fn debounce(mut self, policy: Debounce, event_loop: &EventLoop) -> Self {
        self.debounce = Some((policy, event_loop.clone()));
        self
    }

    /// Rename the model.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Compute the initial attributes and start listening to the sources.
    pub fn build(self) -> Result<ComputedModel> {
        let ModelBuilder {
            name,
            sources,
            attributes,
            debounce,
        } = self;

        let inner = Rc::new(ModelInner {
            id: ArtifactId::new(),
            name,
            sources: RefCell::new(sources),
            computations: attributes,
            attributes: RefCell::new(Attributes::new()),
            observers: ObserverRegistry::new(),
            subscriptions: RefCell::new(Subscriptions::default()),
            debouncer: RefCell::new(None),
            recomputes: Cell::new(0),
            torn_down: Cell::new(false),
        });

        inner.recompute()?;

        if let Some((policy, event_loop)) = debounce {
            let weak = Rc::downgrade(&inner);
            let debouncer = Debouncer::new(policy, &event_loop, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.recompute_logged();
                }
            });
            inner.debouncer.replace(Some(debouncer));
        }

        let weak: Weak<ModelInner> = Rc::downgrade(&inner);
        let handler: Rc<dyn Fn(EventKind)> = Rc::new(move |kind| {
            if let Some(inner) = weak.upgrade() {
                inner.source_changed(kind);
            }
        });
        let subscriptions = Subscriptions::bind(&inner.sources.borrow(), handler);
        inner.subscriptions.replace(subscriptions);

        debug!(
            model = %inner.name,
            subscriptions = inner.subscriptions.borrow().len(),
            attributes = inner.computations.len(),
            "computed model bound"
        );
        Ok(ComputedModel { inner })
    }
}

struct ModelInner {
    id: ArtifactId,
    name: String,
    sources: RefCell<Sources>,
    computations: IndexMap<String, AttributeFn>,
    attributes: RefCell<Attributes>,
    observers: ObserverRegistry<ModelEvent>,
    subscriptions: RefCell<Subscriptions>,
    debouncer: RefCell<Option<Debouncer>>,
    recomputes: Cell<u64>,
    torn_down: Cell<bool>,
}

/// An attribute bag computed from its sources.
///
/// `ComputedModel` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct ComputedModel {
    inner: Rc<ModelInner>,
}

impl ComputedModel {
    /// Start building a model.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            sources: Sources::new(),
            attributes: IndexMap::new(),
            debounce: None,
        }
    }

    /// The model's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The artifact id used by the reentrancy guard.
    pub fn artifact_id(&self) -> ArtifactId {
        self.inner.id
    }

    /// Current value of a computed attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.attributes.borrow().get(key).cloned()
    }

    /// Snapshot of all computed attributes.
    pub fn attributes(&self) -> Attributes {
        self.inner.attributes.borrow().clone()
    }

    /// Listen to attribute changes.
    pub fn on_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ModelEvent) + 'static,
    {
        self.inner.observers.on(EventKind::Changed, handler)
    }

    /// Stop listening.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.observers.off(id)
    }

    /// Re-run every attribute function now. Returns the changed keys.
    ///
    /// Fails with `ReentrantMutation` when called from inside this model's
    /// own recomputation. A torn-down model does nothing.
    pub fn recompute(&self) -> Result<Vec<String>> {
        self.inner.recompute()
    }

    /// How many recomputations have completed.
    pub fn recompute_count(&self) -> u64 {
        self.inner.recomputes.get()
    }

    /// True while a debounced recomputation is waiting.
    pub fn is_pending(&self) -> bool {
        self.inner
            .debouncer
            .borrow()
            .as_ref()
            .is_some_and(Debouncer::is_waiting)
    }

    /// Stop listening to the sources and release them.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// True once torn down.
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }
}

impl fmt::Debug for ComputedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedModel")
            .field("name", &self.inner.name)
            .field("attributes", &*self.inner.attributes.borrow())
            .field("torn_down", &self.inner.torn_down.get())
            .finish()
    }
}

impl ModelInner {
    fn source_changed(&self, kind: EventKind) {
        trace!(model = %self.name, source_event = %kind, "source changed");
        let debouncer = self.debouncer.borrow().clone();
        match debouncer {
            Some(debouncer) => debouncer.trigger(),
            None => self.recompute_logged(),
        }
    }

    fn recompute_logged(&self) {
        if let Err(err) = self.recompute() {
            warn!(model = %self.name, error = %err, "recomputation failed");
        }
    }

    fn recompute(&self) -> Result<Vec<String>> {
        if self.torn_down.get() {
            return Ok(Vec::new());
        }
        let ctx = RecomputeContext::enter(self.id, &self.name)?;

        let sources = self.sources.borrow().clone();
        let mut next = Attributes::with_capacity(self.computations.len());
        for (key, compute) in &self.computations {
            next.insert(key.clone(), compute(&sources)?);
        }

        let changed: Vec<String> = {
            let mut current = self.attributes.borrow_mut();
            let mut changed = Vec::new();
            for (key, value) in next {
                if current.get(&key) != Some(&value) {
                    current.insert(key.clone(), value);
                    changed.push(key);
                }
            }
            changed
        };
        self.recomputes.set(self.recomputes.get() + 1);
        drop(ctx);

        trace!(model = %self.name, changed = ?changed, "recomputed");
        if !changed.is_empty() {
            self.observers.emit(&ModelEvent {
                keys: changed.clone(),
            });
        }
        Ok(changed)
    }

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        self.subscriptions.borrow_mut().release();
        if let Some(debouncer) = self.debouncer.borrow_mut().take() {
            debouncer.cancel();
        }
        self.sources.replace(Sources::new());
        self.observers.clear();
        debug!(model = %self.name, "computed model torn down");
    }
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::collection::Collection;
    use crate::error::Error;
    use crate::schedule::ManualClock;
    use std::time::Duration;

    fn typed_events() -> Collection {
        let events = Collection::named("events");
        events.add(attrs! { "id" => 1, "type" => "A" }).unwrap();
        events.add(attrs! { "id" => 2, "type" => "B" }).unwrap();
        events
    }

    fn count_of(kind: &'static str) -> impl Fn(&Sources) -> Result<Value> {
        move |s| {
            let n = s
                .collection("events")?
                .records()
                .iter()
                .filter(|r| r.text("type").as_deref() == Some(kind))
                .count();
            Ok(Value::from(n))
        }
    }

    #[test]
    fn attributes_follow_sources() {
        let events = typed_events();
        let model = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("total", |s| Ok(Value::from(s.collection("events")?.len())))
            .attribute("a", count_of("A"))
            .build()
            .unwrap();

        assert_eq!(model.get("total"), Some(Value::from(2)));
        assert_eq!(model.get("a"), Some(Value::from(1)));

        let changes = Rc::new(RefCell::new(Vec::new()));
        let c = changes.clone();
        model.on_change(move |e| c.borrow_mut().push(e.keys.clone()));

        events.add(attrs! { "id" => 3, "type" => "A" }).unwrap();
        assert_eq!(model.get("a"), Some(Value::from(2)));

        events.get("2").unwrap().set("type", "A").unwrap();
        assert_eq!(model.get("a"), Some(Value::from(3)));

        events.reset(Vec::<Attributes>::new()).unwrap();
        assert_eq!(model.get("total"), Some(Value::from(0)));

        assert_eq!(
            *changes.borrow(),
            vec![
                vec!["total".to_string(), "a".to_string()],
                vec!["a".to_string()],
                vec!["total".to_string(), "a".to_string()],
            ]
        );
    }

    #[test]
    fn recompute_is_idempotent() {
        let events = typed_events();
        let model = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("a", count_of("A"))
            .build()
            .unwrap();

        let before = model.attributes();
        assert!(model.recompute().unwrap().is_empty());
        assert!(model.recompute().unwrap().is_empty());
        assert_eq!(model.attributes(), before);
    }

    #[test]
    fn failing_attribute_fails_the_whole_computation() {
        let events = typed_events();
        let model = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("total", |s| Ok(Value::from(s.collection("events")?.len())))
            .attribute("missing", |s| Ok(Value::from(s.collection("nope")?.len())));

        assert!(matches!(model.build(), Err(Error::UnknownSource(_))));
    }

    #[test]
    fn self_recompute_is_rejected() {
        let events = typed_events();
        let slot: Rc<RefCell<Option<ComputedModel>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let rejected = Rc::new(Cell::new(0));
        let r = rejected.clone();

        let model = ComputedModel::builder("loop")
            .source("events", &events)
            .attribute("total", move |src| {
                if let Some(me) = s.borrow().as_ref() {
                    if let Err(Error::ReentrantMutation(_)) = me.recompute() {
                        r.set(r.get() + 1);
                    }
                }
                Ok(Value::from(src.collection("events")?.len()))
            })
            .build()
            .unwrap();
        slot.replace(Some(model.clone()));

        events.add(attrs! { "id" => 3 }).unwrap();
        assert_eq!(rejected.get(), 1);
        assert_eq!(model.get("total"), Some(Value::from(3)));
        slot.replace(None);
    }

    #[test]
    fn models_chain() {
        let events = typed_events();
        let stats = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("a", count_of("A"))
            .build()
            .unwrap();
        let summary = ComputedModel::builder("summary")
            .source("stats", &stats)
            .attribute("label", |s| {
                let a = s.model("stats")?.get("a").unwrap_or(Value::from(0));
                Ok(Value::from(format!("{a} of type A")))
            })
            .build()
            .unwrap();

        events.add(attrs! { "id" => 3, "type" => "A" }).unwrap();
        assert_eq!(summary.get("label"), Some(Value::from("2 of type A")));
    }

    #[test]
    fn leading_debounce_reacts_immediately_then_coalesces() {
        let clock = ManualClock::new();
        let ev = EventLoop::new(clock.clone());
        let events = typed_events();
        let model = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("total", |s| Ok(Value::from(s.collection("events")?.len())))
            .debounce(Debounce::leading(Duration::from_millis(50)), &ev)
            .build()
            .unwrap();
        assert_eq!(model.recompute_count(), 1);

        events.add(attrs! { "id" => 3 }).unwrap();
        assert_eq!(model.get("total"), Some(Value::from(3)));
        events.add(attrs! { "id" => 4 }).unwrap();
        events.add(attrs! { "id" => 5 }).unwrap();
        assert_eq!(model.recompute_count(), 2);
        // Leading edge only: the burst's tail is not picked up.
        assert_eq!(model.get("total"), Some(Value::from(3)));
        assert!(model.is_pending());

        ev.run_until_idle();
        assert!(!model.is_pending());
        assert_eq!(model.recompute_count(), 2);
    }

    #[test]
    fn trailing_debounce_settles_on_final_state() {
        let clock = ManualClock::new();
        let ev = EventLoop::new(clock.clone());
        let events = typed_events();
        let model = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("total", |s| Ok(Value::from(s.collection("events")?.len())))
            .debounce(Debounce::trailing(Duration::from_millis(50)), &ev)
            .build()
            .unwrap();

        events.add(attrs! { "id" => 3 }).unwrap();
        events.add(attrs! { "id" => 4 }).unwrap();
        assert_eq!(model.get("total"), Some(Value::from(2)));

        clock.advance(Duration::from_millis(50));
        ev.run_due();
        assert_eq!(model.get("total"), Some(Value::from(4)));
        assert_eq!(model.recompute_count(), 2);
    }

    #[test]
    fn teardown_releases_sources() {
        let events = typed_events();
        let model = ComputedModel::builder("stats")
            .source("events", &events)
            .attribute("total", |s| Ok(Value::from(s.collection("events")?.len())))
            .build()
            .unwrap();
        assert_eq!(events.listener_count(), 1);

        model.teardown();
        assert_eq!(events.listener_count(), 0);
        events.add(attrs! { "id" => 3 }).unwrap();
        assert_eq!(model.get("total"), Some(Value::from(2)));
        assert!(model.recompute().unwrap().is_empty());
    }
}
