//! Computed Collection Implementation
//!
//! A ComputedCollection's membership is a pure function of its sources. The
//! function returns the full list of member attribute maps; the collection
//! reconciles its current membership against that list:
//!
//! - identities no longer listed are removed (`remove`)
//! - new identities are inserted (`add`)
//! - surviving members take exactly the listed attributes; keys the list no
//!   longer carries are dropped (`changed`, only if something moved)
//! - without a comparator, members are reordered to the listed order (`sort`)
//!
//! Recomputing against unchanged sources therefore emits nothing.
//!
//! The collection is read-only from the outside: `add`, `remove` and `reset`
//! on [`ComputedCollection::collection`] fail with `ReadOnly`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::sources::{SourceHandle, Sources, Subscriptions};
use crate::collection::{
    AddOptions, Collection, CollectionEvent, CollectionOptions, Comparator, MutationGate,
    RecordKey,
};
use crate::error::{Error, Result};
use crate::reactive::{ArtifactId, EventKind, ListenerId, RecomputeContext};
use crate::record::{Attributes, Record, RecordId, DEFAULT_ID_ATTRIBUTE};
use crate::schedule::{Debounce, Debouncer, EventLoop};

/// Membership function of a computed collection.
pub type MembersFn = Rc<dyn Fn(&Sources) -> Result<Vec<Attributes>>>;

/// Builder for a [`ComputedCollection`].
pub struct ComputedCollectionBuilder {
    name: String,
    id_attribute: String,
    comparator: Option<Comparator>,
    sources: Sources,
    compute: MembersFn,
    track_sort: bool,
    debounce: Option<(Debounce, EventLoop)>,
}

impl ComputedCollectionBuilder {
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

    /// Key members by `attribute` instead of `id`.
    pub fn id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    /// Order members by `comparator` instead of the computed order.
    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Whether a source `sort` triggers recomputation. On by default.
    pub fn track_sort(mut self, track: bool) -> Self {
        self.track_sort = track;
        self
    }

    /// Debounce source-triggered recomputation on `event_loop`.
    pub fn debounce(mut self, policy: Debounce, event_loop: &EventLoop) -> Self {
        self.debounce = Some((policy, event_loop.clone()));
        self
    }

    /// Rename the collection.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Compute the initial membership and start listening to the sources.
    pub fn build(self) -> Result<ComputedCollection> {
        let ComputedCollectionBuilder {
            name,
            id_attribute,
            comparator,
            sources,
            compute,
            track_sort,
            debounce,
        } = self;

        let view = Collection::view(CollectionOptions {
            name: name.clone(),
            id_attribute,
            comparator,
        });
        let inner = Rc::new(ComputedInner {
            id: ArtifactId::new(),
            name,
            view,
            sources: RefCell::new(sources),
            compute,
            track_sort,
            subscriptions: RefCell::new(Subscriptions::default()),
            debouncer: RefCell::new(None),
            recomputes: Cell::new(0),
            torn_down: Cell::new(false),
        });
        let gate: Weak<dyn MutationGate> = Rc::downgrade(&inner) as Weak<dyn MutationGate>;
        inner.view.set_gate(gate);

        inner.recompute(false)?;

        if let Some((policy, event_loop)) = debounce {
            let weak = Rc::downgrade(&inner);
            let debouncer = Debouncer::new(policy, &event_loop, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.recompute_logged();
                }
            });
            inner.debouncer.replace(Some(debouncer));
        }

        let weak: Weak<ComputedInner> = Rc::downgrade(&inner);
        let handler: Rc<dyn Fn(EventKind)> = Rc::new(move |kind| {
            if let Some(inner) = weak.upgrade() {
                inner.source_changed(kind);
            }
        });
        let subscriptions = Subscriptions::bind(&inner.sources.borrow(), handler);
        inner.subscriptions.replace(subscriptions);

        debug!(
            collection = %inner.name,
            subscriptions = inner.subscriptions.borrow().len(),
            members = inner.view.len(),
            track_sort,
            "computed collection bound"
        );
        Ok(ComputedCollection { inner })
    }
}

struct ComputedInner {
    id: ArtifactId,
    name: String,
    view: Collection,
    sources: RefCell<Sources>,
    compute: MembersFn,
    track_sort: bool,
    subscriptions: RefCell<Subscriptions>,
    debouncer: RefCell<Option<Debouncer>>,
    recomputes: Cell<u64>,
    torn_down: Cell<bool>,
}

/// A read-only collection computed from its sources.
#[derive(Clone)]
pub struct ComputedCollection {
    inner: Rc<ComputedInner>,
}

impl ComputedCollection {
    /// Start building a computed collection with membership function `compute`.
    pub fn builder<F>(name: impl Into<String>, compute: F) -> ComputedCollectionBuilder
    where
        F: Fn(&Sources) -> Result<Vec<Attributes>> + 'static,
    {
        ComputedCollectionBuilder {
            name: name.into(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            comparator: None,
            sources: Sources::new(),
            compute: Rc::new(compute),
            track_sort: true,
            debounce: None,
        }
    }

    /// The membership as a collection, for reading and subscribing.
    pub fn collection(&self) -> &Collection {
        &self.inner.view
    }

    /// The collection's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.inner.view.len()
    }

    /// True if there are no members.
    pub fn is_empty(&self) -> bool {
        self.inner.view.is_empty()
    }

    /// Check membership by identity.
    pub fn contains(&self, id: impl Into<RecordId>) -> bool {
        self.inner.view.contains(id)
    }

    /// Look a member up by identity.
    pub fn get(&self, id: impl Into<RecordId>) -> Option<Record> {
        self.inner.view.get(id)
    }

    /// Snapshot of the members, in order.
    pub fn records(&self) -> Vec<Record> {
        self.inner.view.records()
    }

    /// Snapshot of the member identities, in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner.view.ids()
    }

    /// Register a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.inner.view.on(kind, handler)
    }

    /// Register a handler for every kind of event.
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.inner.view.on_any(handler)
    }

    /// Unregister a handler.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.view.off(id)
    }

    /// Recompute the membership now.
    pub fn recompute(&self) -> Result<()> {
        self.inner.recompute(true)
    }

    /// How many recomputations have completed.
    pub fn recompute_count(&self) -> u64 {
        self.inner.recomputes.get()
    }

    /// Whether source `sort` events trigger recomputation.
    pub fn tracks_sort(&self) -> bool {
        self.inner.track_sort
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

impl fmt::Debug for ComputedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedCollection")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("track_sort", &self.inner.track_sort)
            .field("torn_down", &self.inner.torn_down.get())
            .finish()
    }
}

impl ComputedInner {
    fn source_changed(&self, kind: EventKind) {
        if kind == EventKind::Sort && !self.track_sort {
            return;
        }
        trace!(collection = %self.name, source_event = %kind, "source changed");
        let debouncer = self.debouncer.borrow().clone();
        match debouncer {
            Some(debouncer) => debouncer.trigger(),
            None => self.recompute_logged(),
        }
    }

    fn recompute_logged(&self) {
        if let Err(err) = self.recompute(true) {
            warn!(collection = %self.name, error = %err, "recomputation failed");
        }
    }

    fn recompute(&self, notify: bool) -> Result<()> {
        if self.torn_down.get() {
            return Ok(());
        }
        let _ctx = RecomputeContext::enter(self.id, &self.name)?;

        let sources = self.sources.borrow().clone();
        let rows = (self.compute)(&sources)?;

        // Validate everything before touching the membership.
        let id_attribute = self.view.id_attribute().to_string();
        let mut next: IndexMap<RecordId, Attributes> = IndexMap::with_capacity(rows.len());
        for row in rows {
            let id = row.record_key(&id_attribute)?;
            next.insert(id, row);
        }
        let mut fresh: HashMap<RecordId, Record> = HashMap::new();
        for (id, attributes) in &next {
            if !self.view.contains(id) {
                let record = Record::with_id_attribute(&id_attribute, attributes.clone())?;
                fresh.insert(id.clone(), record);
            }
        }

        if !notify {
            let members = next
                .into_iter()
                .map(|(id, attributes)| match fresh.remove(&id) {
                    Some(record) => Ok(record),
                    None => Record::with_id_attribute(&id_attribute, attributes),
                })
                .collect::<Result<Vec<_>>>()?;
            self.view.apply_reset(members, false)?;
            self.recomputes.set(self.recomputes.get() + 1);
            return Ok(());
        }

        for id in self.view.ids() {
            if !next.contains_key(&id) {
                self.view.apply_remove(&id, true)?;
            }
        }
        for (index, (id, attributes)) in next.iter().enumerate() {
            match fresh.remove(id) {
                Some(record) => {
                    self.view.apply_add(record, Some(index), true)?;
                }
                None => {
                    if let Some(existing) = self.view.get(id) {
                        let keys = existing.replace(attributes.clone())?;
                        if !keys.is_empty() {
                            self.view.apply_changed(&existing, &keys)?;
                        }
                    }
                }
            }
        }
        if self.view.comparator().is_none() {
            let order: Vec<RecordId> = next.into_keys().collect();
            self.view.apply_order(&order, true)?;
        }

        self.recomputes.set(self.recomputes.get() + 1);
        trace!(collection = %self.name, members = self.view.len(), "recomputed");
        Ok(())
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
        self.view.clear_listeners();
        debug!(collection = %self.name, "computed collection torn down");
    }
}

impl MutationGate for ComputedInner {
    fn gate_add(&self, _record: Record, _options: AddOptions) -> Result<Record> {
        Err(Error::ReadOnly(self.name.clone()))
    }

    fn gate_remove(&self, _id: RecordId) -> Result<Option<Record>> {
        Err(Error::ReadOnly(self.name.clone()))
    }

    fn gate_reset(&self, _records: Vec<Record>) -> Result<()> {
        Err(Error::ReadOnly(self.name.clone()))
    }
}

impl Drop for ComputedInner {
    fn drop(&mut self) {
        self.teardown();
    }
}
