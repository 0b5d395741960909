//! Collection Implementation
//!
//! A Collection is an ordered, de-duplicated, observable set of records.
//!
//! # Mutation model
//!
//! Every mutation runs in two phases:
//!
//! 1. The state phase runs inside a [`RecomputeContext`] for this
//!    collection. Comparators run here. Any attempt to mutate the same
//!    collection from inside this phase fails with `ReentrantMutation`
//!    before it touches anything.
//!
//! 2. The notification phase runs after the context is released. Handlers
//!    see the finished state and may mutate the collection again.
//!
//! # Views
//!
//! Derived views are collections too: they reuse the storage, ordering and
//! observer registry, but their public mutators are routed through a
//! [`MutationGate`] owned by the view. The engine itself uses the
//! crate-private `apply_*` methods, which bypass the gate.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace};

use super::{CollectionEvent, Comparator};
use crate::error::{Error, Result};
use crate::reactive::{ArtifactId, Event, EventKind, ListenerId, ObserverRegistry, RecomputeContext};
use crate::record::{Attributes, Record, RecordChange, RecordId, DEFAULT_ID_ATTRIBUTE};

/// Construction options for a [`Collection`].
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    /// Name used in logs and errors.
    pub name: String,
    /// Attribute that identifies members.
    pub id_attribute: String,
    /// Optional ordering. When set it is the only thing deciding order.
    pub comparator: Option<Comparator>,
}

impl CollectionOptions {
    /// Options with the given name and default settings otherwise.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Use `attribute` as the identity attribute.
    pub fn id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    /// Keep the collection ordered by `comparator`.
    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            name: "unnamed collection".to_string(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            comparator: None,
        }
    }
}

/// Options for [`Collection::add_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Insert at this index. Ignored when the collection has a comparator;
    /// clamped to the current length otherwise.
    pub at: Option<usize>,
}

impl AddOptions {
    /// Insert at `index`.
    pub fn at(index: usize) -> Self {
        Self { at: Some(index) }
    }
}

/// Options for [`Collection::sort`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SortOptions {
    /// Re-sort without emitting `sort`.
    pub silent: bool,
}

impl SortOptions {
    /// Sort without notifying.
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

/// Something that can be turned into a member of a collection.
pub trait IntoRecord {
    /// Convert, using the collection's identity attribute.
    fn into_record(self, id_attribute: &str) -> Result<Record>;
}

impl IntoRecord for Record {
    fn into_record(self, id_attribute: &str) -> Result<Record> {
        if self.id_attribute() != id_attribute {
            return Err(Error::InvalidRecord(format!(
                "record {} is keyed by `{}` but the collection is keyed by `{id_attribute}`",
                self.id(),
                self.id_attribute()
            )));
        }
        Ok(self)
    }
}

impl IntoRecord for &Record {
    fn into_record(self, id_attribute: &str) -> Result<Record> {
        self.clone().into_record(id_attribute)
    }
}

impl IntoRecord for Attributes {
    fn into_record(self, id_attribute: &str) -> Result<Record> {
        Record::with_id_attribute(id_attribute, self)
    }
}

/// Something that names a member: a record, an identity, or raw attributes.
pub trait RecordKey {
    /// Resolve the identity, using the collection's identity attribute.
    fn record_key(&self, id_attribute: &str) -> Result<RecordId>;
}

impl RecordKey for Record {
    fn record_key(&self, _: &str) -> Result<RecordId> {
        Ok(self.id().clone())
    }
}

impl RecordKey for RecordId {
    fn record_key(&self, _: &str) -> Result<RecordId> {
        Ok(self.clone())
    }
}

impl RecordKey for str {
    fn record_key(&self, _: &str) -> Result<RecordId> {
        Ok(RecordId::from(self))
    }
}

impl RecordKey for Attributes {
    fn record_key(&self, id_attribute: &str) -> Result<RecordId> {
        self.get(id_attribute)
            .and_then(RecordId::from_value)
            .ok_or_else(|| {
                Error::InvalidRecord(format!("missing identity attribute `{id_attribute}`"))
            })
    }
}

impl<T: RecordKey + ?Sized> RecordKey for &T {
    fn record_key(&self, id_attribute: &str) -> Result<RecordId> {
        (**self).record_key(id_attribute)
    }
}

/// Routes external mutations of a view to whoever owns it.
pub(crate) trait MutationGate {
    fn gate_add(&self, record: Record, options: AddOptions) -> Result<Record>;
    fn gate_remove(&self, id: RecordId) -> Result<Option<Record>>;
    fn gate_reset(&self, records: Vec<Record>) -> Result<()>;
}

struct CollectionInner {
    id: ArtifactId,
    name: String,
    id_attribute: String,
    comparator: RefCell<Option<Comparator>>,
    members: RefCell<IndexMap<RecordId, Record>>,
    observers: ObserverRegistry<CollectionEvent>,
    /// Per-member listener on the record's own change notifications.
    record_listeners: RefCell<HashMap<RecordId, (Record, ListenerId)>>,
    /// Views do not proxy record changes; their owner forwards them.
    proxy_changes: bool,
    /// Identity being merged by an upsert; its change is reported as `add`.
    merging: RefCell<Option<RecordId>>,
    gate: RefCell<Option<Weak<dyn MutationGate>>>,
}

/// An ordered, de-duplicated, observable set of records.
///
/// `Collection` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct Collection {
    inner: Rc<CollectionInner>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(options: CollectionOptions) -> Self {
        Self::build(options, true)
    }

    /// Create an empty collection with default options and the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(CollectionOptions::named(name))
    }

    /// Create a collection and populate it without emitting anything.
    pub fn with_records<I>(options: CollectionOptions, records: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: IntoRecord,
    {
        let collection = Self::new(options);
        let records = collection.convert_all(records)?;
        collection.apply_reset(records, false)?;
        Ok(collection)
    }

    /// Create a view: a collection that does not watch its records and
    /// whose public mutators go through a gate.
    pub(crate) fn view(options: CollectionOptions) -> Self {
        Self::build(options, false)
    }

    fn build(options: CollectionOptions, proxy_changes: bool) -> Self {
        let CollectionOptions {
            name,
            id_attribute,
            comparator,
        } = options;

        Self {
            inner: Rc::new(CollectionInner {
                id: ArtifactId::new(),
                name,
                id_attribute,
                comparator: RefCell::new(comparator),
                members: RefCell::new(IndexMap::new()),
                observers: ObserverRegistry::new(),
                record_listeners: RefCell::new(HashMap::new()),
                proxy_changes,
                merging: RefCell::new(None),
                gate: RefCell::new(None),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The artifact id used by the reentrancy guard.
    pub fn artifact_id(&self) -> ArtifactId {
        self.inner.id
    }

    /// The collection's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The identity attribute of members.
    pub fn id_attribute(&self) -> &str {
        &self.inner.id_attribute
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.inner.members.borrow().len()
    }

    /// True if there are no members.
    pub fn is_empty(&self) -> bool {
        self.inner.members.borrow().is_empty()
    }

    /// Look a member up by identity.
    pub fn get(&self, id: impl Into<RecordId>) -> Option<Record> {
        self.inner.members.borrow().get(&id.into()).cloned()
    }

    /// Check membership by identity.
    pub fn contains(&self, id: impl Into<RecordId>) -> bool {
        self.inner.members.borrow().contains_key(&id.into())
    }

    /// Position of a member.
    pub fn index_of(&self, id: impl Into<RecordId>) -> Option<usize> {
        self.inner.members.borrow().get_index_of(&id.into())
    }

    /// Member at `index`.
    pub fn at(&self, index: usize) -> Option<Record> {
        self.inner
            .members
            .borrow()
            .get_index(index)
            .map(|(_, r)| r.clone())
    }

    /// Snapshot of the members, in order.
    pub fn records(&self) -> Vec<Record> {
        self.inner.members.borrow().values().cloned().collect()
    }

    /// Snapshot of the member identities, in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner.members.borrow().keys().cloned().collect()
    }

    /// The current comparator.
    pub fn comparator(&self) -> Option<Comparator> {
        self.inner.comparator.borrow().clone()
    }

    /// True if both handles refer to the same collection.
    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Subscription
    // ------------------------------------------------------------------

    /// Register a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.inner.observers.on(kind, handler)
    }

    /// Register a handler for every kind of event.
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.inner.observers.on_any(handler)
    }

    /// Unregister a handler.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.observers.off(id)
    }

    /// Number of registered handlers.
    pub fn listener_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Number of handler invocations that panicked.
    pub fn handler_failures(&self) -> usize {
        self.inner.observers.failures()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert a record, or merge it into the member with the same identity.
    ///
    /// Returns the member as stored after the call.
    pub fn add(&self, record: impl IntoRecord) -> Result<Record> {
        self.add_with(record, AddOptions::default())
    }

    /// [`Collection::add`] with options.
    pub fn add_with(&self, record: impl IntoRecord, options: AddOptions) -> Result<Record> {
        let record = record.into_record(&self.inner.id_attribute)?;
        match self.gate()? {
            Some(gate) => gate.gate_add(record, options),
            None => self.apply_add(record, options.at, true),
        }
    }

    /// Remove a member. Removing an absent record is a no-op.
    pub fn remove(&self, key: impl RecordKey) -> Result<Option<Record>> {
        let id = key.record_key(&self.inner.id_attribute)?;
        match self.gate()? {
            Some(gate) => gate.gate_remove(id),
            None => self.apply_remove(&id, true),
        }
    }

    /// Replace the whole membership in one step.
    ///
    /// Every input is validated before anything changes. When the input
    /// repeats an identity the last occurrence wins, at the position of the
    /// first.
    pub fn reset<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: IntoRecord,
    {
        let records = self.convert_all(records)?;
        match self.gate()? {
            Some(gate) => gate.gate_reset(records),
            None => self.apply_reset(records, true),
        }
    }

    /// Re-apply the comparator.
    ///
    /// Returns whether the order changed. `sort` is emitted only if it did
    /// and the call is not silent.
    pub fn sort(&self, options: SortOptions) -> Result<bool> {
        let ctx = RecomputeContext::enter(self.inner.id, &self.inner.name)?;
        let changed = self.sort_members();
        drop(ctx);

        if changed && !options.silent {
            self.emit(CollectionEvent::Sort);
        }
        Ok(changed)
    }

    /// Replace the comparator and re-sort.
    pub fn set_comparator(&self, comparator: Option<Comparator>) -> Result<bool> {
        if RecomputeContext::is_active(self.inner.id) {
            return Err(Error::ReentrantMutation(self.inner.name.clone()));
        }
        self.inner.comparator.replace(comparator);
        self.sort(SortOptions::default())
    }

    fn convert_all<I>(&self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator,
        I::Item: IntoRecord,
    {
        records
            .into_iter()
            .map(|r| r.into_record(&self.inner.id_attribute))
            .collect()
    }

    fn gate(&self) -> Result<Option<Rc<dyn MutationGate>>> {
        match &*self.inner.gate.borrow() {
            None => Ok(None),
            Some(weak) => weak
                .upgrade()
                .map(Some)
                .ok_or_else(|| Error::ReadOnly(self.inner.name.clone())),
        }
    }

    // ------------------------------------------------------------------
    // Engine-side mutation (bypasses the gate)
    // ------------------------------------------------------------------

    pub(crate) fn set_gate(&self, gate: Weak<dyn MutationGate>) {
        self.inner.gate.replace(Some(gate));
    }

    pub(crate) fn clear_listeners(&self) {
        self.inner.observers.clear();
    }

    pub(crate) fn apply_add(&self, record: Record, at: Option<usize>, notify: bool) -> Result<Record> {
        let inner = &self.inner;
        let ctx = RecomputeContext::enter(inner.id, &inner.name)?;

        let existing = inner.members.borrow().get(record.id()).cloned();
        if let Some(existing) = existing {
            if !existing.ptr_eq(&record) {
                inner.merging.replace(Some(existing.id().clone()));
                let merged = existing.merge(record.attributes());
                inner.merging.replace(None);
                merged?;
            }
            let sorted = self.sort_members();
            let index = self.index_of(existing.id()).unwrap_or_default();
            drop(ctx);

            if notify {
                self.emit(CollectionEvent::Add {
                    record: existing.clone(),
                    index,
                    merged: true,
                });
                if sorted {
                    self.emit(CollectionEvent::Sort);
                }
            }
            return Ok(existing);
        }

        let index = self.insertion_index(&record, at);
        inner
            .members
            .borrow_mut()
            .shift_insert(index, record.id().clone(), record.clone());
        self.watch(&record);
        drop(ctx);

        if notify {
            self.emit(CollectionEvent::Add {
                record: record.clone(),
                index,
                merged: false,
            });
        }
        Ok(record)
    }

    pub(crate) fn apply_remove(&self, id: &RecordId, notify: bool) -> Result<Option<Record>> {
        let ctx = RecomputeContext::enter(self.inner.id, &self.inner.name)?;
        let removed = self.inner.members.borrow_mut().shift_remove_full(id);
        let Some((index, _, record)) = removed else {
            return Ok(None);
        };
        self.unwatch(record.id());
        drop(ctx);

        if notify {
            self.emit(CollectionEvent::Remove {
                record: record.clone(),
                index,
            });
        }
        Ok(Some(record))
    }

    pub(crate) fn apply_reset(&self, records: Vec<Record>, notify: bool) -> Result<()> {
        let ctx = RecomputeContext::enter(self.inner.id, &self.inner.name)?;

        let mut next: IndexMap<RecordId, Record> = IndexMap::with_capacity(records.len());
        for record in records {
            next.insert(record.id().clone(), record);
        }

        let previous = self.inner.members.replace(next);
        for id in previous.keys() {
            self.unwatch(id);
        }
        for record in self.records() {
            self.watch(&record);
        }
        self.sort_members();
        let records = self.records();
        drop(ctx);

        debug!(
            collection = %self.inner.name,
            previous = previous.len(),
            current = records.len(),
            "reset"
        );
        if notify {
            self.emit(CollectionEvent::Reset { records });
        }
        Ok(())
    }

    /// Reorder members to follow `order`. Members not mentioned keep their
    /// relative order after the mentioned ones.
    pub(crate) fn apply_order(&self, order: &[RecordId], notify: bool) -> Result<bool> {
        let ctx = RecomputeContext::enter(self.inner.id, &self.inner.name)?;

        let desired: Vec<RecordId> = {
            let members = self.inner.members.borrow();
            let mentioned: HashSet<&RecordId> = order.iter().collect();
            order
                .iter()
                .filter(|id| members.contains_key(*id))
                .chain(members.keys().filter(|id| !mentioned.contains(id)))
                .cloned()
                .collect()
        };

        let changed = !self.inner.members.borrow().keys().eq(desired.iter());
        if changed {
            let mut members = self.inner.members.borrow_mut();
            let next: IndexMap<RecordId, Record> = desired
                .into_iter()
                .filter_map(|id| members.get(&id).cloned().map(|r| (id, r)))
                .collect();
            *members = next;
        }
        drop(ctx);

        if changed && notify {
            self.emit(CollectionEvent::Sort);
        }
        Ok(changed)
    }

    /// Re-announce an in-place change of a member, re-sorting if needed.
    pub(crate) fn apply_changed(&self, record: &Record, keys: &[String]) -> Result<()> {
        let ctx = RecomputeContext::enter(self.inner.id, &self.inner.name)?;
        let sorted = self.sort_members();
        drop(ctx);

        self.emit(CollectionEvent::Changed {
            record: record.clone(),
            keys: keys.to_vec(),
        });
        if sorted {
            self.emit(CollectionEvent::Sort);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn emit(&self, event: CollectionEvent) {
        trace!(
            collection = %self.inner.name,
            event = %event.kind(),
            "emit"
        );
        self.inner.observers.emit(&event);
    }

    fn insertion_index(&self, record: &Record, at: Option<usize>) -> usize {
        let comparator = self.inner.comparator.borrow().clone();
        let members: Vec<Record> = self.records();
        match comparator {
            Some(cmp) => members
                .iter()
                .position(|m| cmp.compare(m, record) == Ordering::Greater)
                .unwrap_or(members.len()),
            None => at.map_or(members.len(), |i| i.min(members.len())),
        }
    }

    /// Sort by the comparator, if any. Returns whether the order changed.
    ///
    /// Runs the comparator on a snapshot so that it may read the collection.
    fn sort_members(&self) -> bool {
        let Some(cmp) = self.inner.comparator.borrow().clone() else {
            return false;
        };

        let mut records = self.records();
        let already_sorted = records
            .windows(2)
            .all(|w| cmp.compare(&w[0], &w[1]) != Ordering::Greater);
        if already_sorted {
            return false;
        }

        records.sort_by(|a, b| cmp.compare(a, b));
        *self.inner.members.borrow_mut() = records
            .into_iter()
            .map(|r| (r.id().clone(), r))
            .collect();
        true
    }

    fn watch(&self, record: &Record) {
        if !self.inner.proxy_changes {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let listener = record.on_change(move |change| {
            if let Some(inner) = weak.upgrade() {
                Collection { inner }.record_changed(change);
            }
        });
        self.inner
            .record_listeners
            .borrow_mut()
            .insert(record.id().clone(), (record.clone(), listener));
    }

    fn unwatch(&self, id: &RecordId) {
        let entry = self.inner.record_listeners.borrow_mut().remove(id);
        if let Some((record, listener)) = entry {
            record.off_change(listener);
        }
    }

    fn record_changed(&self, change: &RecordChange) {
        if self.inner.merging.borrow().as_ref() == Some(change.record.id()) {
            return;
        }

        // A failed guard is already logged; the change itself still happened.
        let sorted = match RecomputeContext::enter(self.inner.id, &self.inner.name) {
            Ok(_ctx) => self.sort_members(),
            Err(_) => false,
        };

        self.emit(CollectionEvent::Changed {
            record: change.record.clone(),
            keys: change.keys.clone(),
        });
        if sorted {
            self.emit(CollectionEvent::Sort);
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("comparator", &*self.inner.comparator.borrow())
            .field("listeners", &self.inner.observers.len())
            .finish()
    }
}
