//! Derived Collection Implementation
//!
//! A DerivedCollection is a live, predicate-filtered view of exactly one
//! base collection. It subscribes to the base and mirrors every base event
//! into its own membership before the base mutation returns, so at every
//! observable point:
//!
//! ```text
//! members(view) == { r in members(base) : predicate(r) }
//! ```
//!
//! # Ordering
//!
//! - With its own comparator, the comparator decides.
//! - With `track_order`, members keep the relative order they have in the
//!   base. Insert positions are recomputed from the filtered base on every
//!   insert (O(n)), and a base `sort` re-derives the whole order.
//! - Otherwise members start in base order and later inserts are appended.
//!
//! # Mutation
//!
//! The view does not own its records. External `add` and `remove` calls are
//! forwarded to the base after checking the predicate, and come back through
//! the normal propagation path. A record that would fail the predicate is
//! rejected with `PredicateViolation`. An `at` index given to `add_with`
//! is a view position and lands in front of the member currently there.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::collection::{
    AddOptions, Collection, CollectionEvent, CollectionOptions, Comparator, MutationGate,
    RecordKey,
};
use crate::error::{Error, Result};
use crate::reactive::{EventKind, ListenerId};
use crate::record::{Record, RecordId};

/// A record filter.
pub type Predicate = Rc<dyn Fn(&Record) -> bool>;

/// Construction options for a [`DerivedCollection`].
#[derive(Clone)]
pub struct DerivedOptions {
    /// Name used in logs and errors.
    pub name: String,
    /// Membership test. `None` admits every base record.
    pub predicate: Option<Predicate>,
    /// Keep the base's relative order.
    pub track_order: bool,
    /// Own ordering; takes precedence over `track_order`.
    pub comparator: Option<Comparator>,
}

impl DerivedOptions {
    /// Options with the given name, admitting everything.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicate: None,
            track_order: false,
            comparator: None,
        }
    }

    /// Admit only records satisfying `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + 'static,
    {
        self.predicate = Some(Rc::new(predicate));
        self
    }

    /// Follow the base's order.
    pub fn track_order(mut self) -> Self {
        self.track_order = true;
        self
    }

    /// Order by `comparator` instead of following the base.
    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }
}

impl Default for DerivedOptions {
    fn default() -> Self {
        Self::named("unnamed view")
    }
}

impl fmt::Debug for DerivedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedOptions")
            .field("name", &self.name)
            .field("filtered", &self.predicate.is_some())
            .field("track_order", &self.track_order)
            .field("comparator", &self.comparator)
            .finish()
    }
}

struct DerivedInner {
    name: String,
    view: Collection,
    base: RefCell<Option<Collection>>,
    predicate: RefCell<Predicate>,
    track_order: bool,
    has_comparator: bool,
    listener: Cell<Option<ListenerId>>,
}

/// A live, predicate-filtered view of a base collection.
#[derive(Clone)]
pub struct DerivedCollection {
    inner: Rc<DerivedInner>,
}

impl DerivedCollection {
    /// Bind a new view to `base`.
    pub fn new(base: &Collection, options: DerivedOptions) -> Self {
        let DerivedOptions {
            name,
            predicate,
            track_order,
            comparator,
        } = options;

        let predicate: Predicate = predicate.unwrap_or_else(|| Rc::new(|_: &Record| true));
        let has_comparator = comparator.is_some();
        let view = Collection::view(CollectionOptions {
            name: name.clone(),
            id_attribute: base.id_attribute().to_string(),
            comparator,
        });

        let inner = Rc::new(DerivedInner {
            name,
            view,
            base: RefCell::new(Some(base.clone())),
            predicate: RefCell::new(predicate),
            track_order,
            has_comparator,
            listener: Cell::new(None),
        });

        let gate: Weak<dyn MutationGate> = Rc::downgrade(&inner) as Weak<dyn MutationGate>;
        inner.view.set_gate(gate);

        let initial = inner.filtered(&base.records());
        if let Err(err) = inner.view.apply_reset(initial, false) {
            warn!(view = %inner.name, error = %err, "initial derivation failed");
        }

        let weak = Rc::downgrade(&inner);
        let listener = base.on_any(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.follow(event);
            }
        });
        inner.listener.set(Some(listener));

        debug!(
            view = %inner.name,
            base = base.name(),
            members = inner.view.len(),
            track_order,
            "derived collection bound"
        );
        Self { inner }
    }

    /// The view as a collection, for reading and subscribing.
    ///
    /// Mutators called on it are routed back through this view's checks.
    pub fn collection(&self) -> &Collection {
        &self.inner.view
    }

    /// The view's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The base, or `None` after teardown.
    pub fn base(&self) -> Option<Collection> {
        self.inner.base.borrow().clone()
    }

    /// Whether the view follows the base order.
    pub fn tracks_order(&self) -> bool {
        self.inner.track_order
    }

    /// True once the view has been detached from its base.
    pub fn is_torn_down(&self) -> bool {
        self.inner.base.borrow().is_none()
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

    /// Add a record through the base.
    ///
    /// Fails with `PredicateViolation` if the record, merged with any base
    /// member of the same identity, would not pass the predicate.
    pub fn add(&self, record: impl crate::collection::IntoRecord) -> Result<Record> {
        self.inner.view.add(record)
    }

    /// Remove a member through the base.
    ///
    /// Ids the base does not hold are a no-op. A base record that fails the
    /// predicate is rejected with `PredicateViolation`.
    pub fn remove(&self, key: impl RecordKey) -> Result<Option<Record>> {
        self.inner.view.remove(key)
    }

    /// Replace the predicate and re-derive the membership.
    ///
    /// Emits one `reset`. After teardown only the predicate is replaced.
    pub fn set_predicate<F>(&self, predicate: F) -> Result<()>
    where
        F: Fn(&Record) -> bool + 'static,
    {
        self.inner.predicate.replace(Rc::new(predicate));
        let base = self.inner.base.borrow().clone();
        match base {
            Some(base) => self.inner.rederive(&base.records()),
            None => Ok(()),
        }
    }

    /// Check a record against the current predicate.
    pub fn admits(&self, record: &Record) -> bool {
        self.inner.admits(record)
    }

    /// Detach from the base.
    ///
    /// Afterwards the view emits nothing, holds no reference to the base and
    /// rejects mutation. Its last membership stays readable.
    pub fn teardown(&self) {
        self.inner.detach();
    }
}

impl fmt::Debug for DerivedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCollection")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("track_order", &self.inner.track_order)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl DerivedInner {
    fn admits(&self, record: &Record) -> bool {
        let predicate = Rc::clone(&self.predicate.borrow());
        predicate(record)
    }

    fn filtered(&self, records: &[Record]) -> Vec<Record> {
        let predicate = Rc::clone(&self.predicate.borrow());
        records.iter().filter(|r| predicate(r)).cloned().collect()
    }

    fn rederive(&self, records: &[Record]) -> Result<()> {
        let members = self.filtered(records);
        self.view.apply_reset(members, true)
    }

    /// Mirror one base event.
    fn follow(&self, event: &CollectionEvent) {
        let outcome = match event {
            CollectionEvent::Add { record, .. } => self.reconcile(record, None),
            CollectionEvent::Changed { record, keys } => self.reconcile(record, Some(keys)),
            CollectionEvent::Remove { record, .. } => {
                self.view.apply_remove(record.id(), true).map(|_| ())
            }
            CollectionEvent::Reset { records } => self.rederive(records),
            CollectionEvent::Sort => self.reorder(),
        };

        if let Err(err) = outcome {
            warn!(view = %self.name, error = %err, "failed to follow base event");
        }
    }

    /// Bring one record's membership in line with the predicate.
    fn reconcile(&self, record: &Record, changed: Option<&Vec<String>>) -> Result<()> {
        let passes = self.admits(record);
        let member = self.view.contains(record.id());

        match (passes, member) {
            (true, false) => {
                let at = self.position_for(record);
                self.view.apply_add(record.clone(), at, true).map(|_| ())
            }
            (false, true) => self.view.apply_remove(record.id(), true).map(|_| ()),
            (true, true) => match changed {
                Some(keys) => self.view.apply_changed(record, keys),
                None => self.view.apply_add(record.clone(), None, true).map(|_| ()),
            },
            (false, false) => Ok(()),
        }
    }

    /// Insert position for a newly admitted record.
    fn position_for(&self, record: &Record) -> Option<usize> {
        if self.has_comparator || !self.track_order {
            return None;
        }
        let base = self.base.borrow().clone()?;
        let predicate = Rc::clone(&self.predicate.borrow());
        let preceding = base
            .records()
            .iter()
            .take_while(|r| r.id() != record.id())
            .filter(|r| predicate(r))
            .count();
        Some(preceding)
    }

    fn reorder(&self) -> Result<()> {
        if self.has_comparator || !self.track_order {
            return Ok(());
        }
        let Some(base) = self.base.borrow().clone() else {
            return Ok(());
        };
        self.view.apply_order(&base.ids(), true).map(|_| ())
    }

    fn detach(&self) {
        let base = self.base.borrow_mut().take();
        if let (Some(base), Some(listener)) = (base, self.listener.take()) {
            base.off(listener);
            debug!(view = %self.name, base = base.name(), "derived collection torn down");
        }
        self.view.clear_listeners();
    }
}

impl MutationGate for DerivedInner {
    fn gate_add(&self, record: Record, options: AddOptions) -> Result<Record> {
        let base = self
            .base
            .borrow()
            .clone()
            .ok_or_else(|| Error::ReadOnly(self.name.clone()))?;

        // Judge the record as it would look after an upsert into the base.
        let candidate = match base.get(record.id()) {
            Some(existing) => {
                let mut merged = existing.attributes();
                merged.extend(record.attributes());
                Record::with_id_attribute(record.id_attribute(), merged)?
            }
            None => record.clone(),
        };
        if !self.admits(&candidate) {
            return Err(Error::PredicateViolation {
                collection: self.name.clone(),
                record: record.id().clone(),
            });
        }

        // A view index means "before the member now at that index".
        let at = options.at.map(|index| match self.view.at(index) {
            Some(member) => base.index_of(member.id()).unwrap_or(base.len()),
            None => base.len(),
        });
        base.add_with(record, AddOptions { at })
    }

    fn gate_remove(&self, id: RecordId) -> Result<Option<Record>> {
        let base = self
            .base
            .borrow()
            .clone()
            .ok_or_else(|| Error::ReadOnly(self.name.clone()))?;

        let Some(record) = base.get(&id) else {
            return Ok(None);
        };
        if !self.admits(&record) {
            return Err(Error::PredicateViolation {
                collection: self.name.clone(),
                record: id,
            });
        }
        base.remove(&id)
    }

    fn gate_reset(&self, _records: Vec<Record>) -> Result<()> {
        Err(Error::ReadOnly(self.name.clone()))
    }
}

impl Drop for DerivedInner {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    fn ids(view: &DerivedCollection) -> Vec<String> {
        view.ids().iter().map(|id| id.to_string()).collect()
    }

    fn typed_base() -> Collection {
        let base = Collection::named("base");
        base.add(attrs! { "id" => 1, "type" => "A" }).unwrap();
        base.add(attrs! { "id" => 2, "type" => "B" }).unwrap();
        base.add(attrs! { "id" => 3, "type" => "A" }).unwrap();
        base
    }

    fn type_a(record: &Record) -> bool {
        record.text("type").as_deref() == Some("A")
    }

    #[test]
    fn initial_membership_is_filtered_base() {
        let base = typed_base();
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a));
        assert_eq!(ids(&view), vec!["1", "3"]);
    }

    #[test]
    fn follows_add_and_remove_in_base_order() {
        let base = typed_base();
        let view = DerivedCollection::new(
            &base,
            DerivedOptions::named("a").filter(type_a).track_order(),
        );

        base.add(attrs! { "id" => 4, "type" => "A" }).unwrap();
        assert_eq!(ids(&view), vec!["1", "3", "4"]);

        base.remove("1").unwrap();
        assert_eq!(ids(&view), vec!["3", "4"]);

        base.add_with(attrs! { "id" => 5, "type" => "A" }, AddOptions::at(0)).unwrap();
        assert_eq!(ids(&view), vec!["5", "3", "4"]);

        base.add(attrs! { "id" => 6, "type" => "B" }).unwrap();
        assert_eq!(ids(&view), vec!["5", "3", "4"]);
    }

    #[test]
    fn untracked_inserts_append() {
        let base = typed_base();
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a));

        base.add_with(attrs! { "id" => 5, "type" => "A" }, AddOptions::at(0)).unwrap();
        assert_eq!(ids(&view), vec!["1", "3", "5"]);
    }

    #[test]
    fn base_sort_is_tracked() {
        let base = typed_base();
        let view = DerivedCollection::new(
            &base,
            DerivedOptions::named("a").filter(type_a).track_order(),
        );

        let sorts = Rc::new(Cell::new(0));
        let s = sorts.clone();
        view.on(EventKind::Sort, move |_| s.set(s.get() + 1));

        base.set_comparator(Some(Comparator::by(|a, b| b.id().cmp(a.id()))))
            .unwrap();
        assert_eq!(ids(&view), vec!["3", "1"]);
        assert_eq!(sorts.get(), 1);
    }

    #[test]
    fn own_comparator_wins() {
        let base = typed_base();
        let view = DerivedCollection::new(
            &base,
            DerivedOptions::named("a")
                .filter(type_a)
                .track_order()
                .comparator(Comparator::by(|a, b| b.id().cmp(a.id()))),
        );
        assert_eq!(ids(&view), vec!["3", "1"]);

        base.add(attrs! { "id" => 4, "type" => "A" }).unwrap();
        assert_eq!(ids(&view), vec!["4", "3", "1"]);
    }

    #[test]
    fn record_changes_move_membership() {
        let base = typed_base();
        let view = DerivedCollection::new(
            &base,
            DerivedOptions::named("a").filter(type_a).track_order(),
        );

        base.get("2").unwrap().set("type", "A").unwrap();
        assert_eq!(ids(&view), vec!["1", "2", "3"]);

        base.get("1").unwrap().set("type", "B").unwrap();
        assert_eq!(ids(&view), vec!["2", "3"]);
    }

    #[test]
    fn base_reset_becomes_one_view_reset() {
        let base = typed_base();
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        view.on_any(move |event| {
            s.borrow_mut().push(crate::reactive::Event::kind(event));
        });

        base.reset(vec![
            attrs! { "id" => 7, "type" => "A" },
            attrs! { "id" => 8, "type" => "B" },
        ])
        .unwrap();

        assert_eq!(ids(&view), vec!["7"]);
        assert_eq!(*seen.borrow(), vec![EventKind::Reset]);
    }

    #[test]
    fn set_predicate_rederives() {
        let base = typed_base();
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a));

        view.set_predicate(|r| r.text("type").as_deref() == Some("B")).unwrap();
        assert_eq!(ids(&view), vec!["2"]);
    }

    #[test]
    fn external_mutation_goes_through_base() {
        let base = typed_base();
        let view = DerivedCollection::new(
            &base,
            DerivedOptions::named("a").filter(type_a).track_order(),
        );

        let err = view.add(attrs! { "id" => 9, "type" => "B" }).unwrap_err();
        assert!(matches!(err, Error::PredicateViolation { .. }));
        assert!(!base.contains("9"));

        // Merging would turn member 1 into a B.
        let err = view.add(attrs! { "id" => 1, "type" => "B" }).unwrap_err();
        assert!(matches!(err, Error::PredicateViolation { .. }));
        assert_eq!(base.get("1").unwrap().text("type").as_deref(), Some("A"));

        view.add(attrs! { "id" => 9, "type" => "A" }).unwrap();
        assert!(base.contains("9"));
        assert_eq!(ids(&view), vec!["1", "3", "9"]);

        // Also through the collection handle.
        let err = view.collection().add(attrs! { "id" => 10, "type" => "B" }).unwrap_err();
        assert!(matches!(err, Error::PredicateViolation { .. }));

        let err = view.remove("2").unwrap_err();
        assert!(matches!(
            err,
            Error::PredicateViolation { ref record, .. } if record.as_str() == "2"
        ));
        assert!(base.contains("2"));
        assert!(view.remove("42").unwrap().is_none());

        view.remove("1").unwrap();
        assert!(!base.contains("1"));

        assert!(matches!(
            view.collection().reset(Vec::<Record>::new()),
            Err(Error::ReadOnly(_))
        ));
    }

    #[test]
    fn view_positions_map_onto_the_base() {
        let base = typed_base();
        let view = DerivedCollection::new(
            &base,
            DerivedOptions::named("a").filter(type_a).track_order(),
        );

        view.collection()
            .add_with(attrs! { "id" => 4, "type" => "A" }, AddOptions::at(1))
            .unwrap();
        assert_eq!(ids(&view), vec!["1", "4", "3"]);
        assert_eq!(base.index_of("4"), Some(2));

        view.collection()
            .add_with(attrs! { "id" => 5, "type" => "A" }, AddOptions::at(99))
            .unwrap();
        assert_eq!(ids(&view), vec!["1", "4", "3", "5"]);
    }

    #[test]
    fn derived_of_derived() {
        let base = typed_base();
        let a = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a).track_order());
        let odd_a = DerivedCollection::new(
            a.collection(),
            DerivedOptions::named("odd a")
                .filter(|r| r.get("id").and_then(|v| v.as_number()).map_or(false, |n| n as i64 % 2 == 1))
                .track_order(),
        );

        base.add(attrs! { "id" => 5, "type" => "A" }).unwrap();
        base.add(attrs! { "id" => 6, "type" => "A" }).unwrap();
        base.add(attrs! { "id" => 7, "type" => "B" }).unwrap();

        assert_eq!(ids(&odd_a), vec!["1", "3", "5"]);
    }

    #[test]
    fn teardown_stops_propagation_and_releases_base() {
        let base = typed_base();
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a));
        assert_eq!(base.listener_count(), 1);

        let events = Rc::new(Cell::new(0));
        let e = events.clone();
        view.on_any(move |_| e.set(e.get() + 1));

        view.teardown();
        assert_eq!(base.listener_count(), 0);
        assert!(view.base().is_none());

        base.add(attrs! { "id" => 4, "type" => "A" }).unwrap();
        assert_eq!(events.get(), 0);
        assert_eq!(ids(&view), vec!["1", "3"]);
        assert!(matches!(
            view.add(attrs! { "id" => 5, "type" => "A" }),
            Err(Error::ReadOnly(_))
        ));
    }

    #[test]
    fn dropping_the_view_unsubscribes() {
        let base = typed_base();
        {
            let _view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(type_a));
            assert_eq!(base.listener_count(), 1);
        }
        assert_eq!(base.listener_count(), 0);
    }
}
