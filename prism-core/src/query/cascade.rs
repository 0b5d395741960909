//! Predicate Cascade
//!
//! A two-level display hierarchy driven by one [`QueryState`]:
//!
//! - group level: a group is visible iff the query's scopes admit its type
//! - item level: each group's items are a [`DerivedCollection`] of its base,
//!   filtered by the query text over the group's label attributes
//!
//! Every query change re-evaluates both levels before `set` returns: the
//! item predicate is rebuilt from the new text and the group's visibility
//! predicate is asked again. Nothing is carried over from the previous query.
//!
//! The group level defaults to [`scope_matches`]; a group may swap in its own
//! [`VisibilityFn`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::matching::{scope_matches, text_predicate};
use super::{Query, QueryState};
use crate::collection::Collection;
use crate::derived::{DerivedCollection, DerivedOptions};
use crate::reactive::{Event, EventKind, ListenerId, ObserverRegistry};
use crate::record::Record;

/// Notification that a group was shown or hidden.
#[derive(Debug, Clone)]
pub struct GroupEvent {
    /// The group's type.
    pub group_type: String,
    /// Visibility after the change.
    pub visible: bool,
}

impl Event for GroupEvent {
    fn kind(&self) -> EventKind {
        EventKind::Changed
    }
}

/// Decides whether a group of the given type is visible under a query.
pub type VisibilityFn = Rc<dyn Fn(&Query, &str) -> bool>;

fn default_visibility() -> VisibilityFn {
    Rc::new(|query: &Query, group_type: &str| scope_matches(query.scopes(), group_type))
}

struct GroupInner {
    group_type: String,
    labels: Vec<String>,
    items: DerivedCollection,
    query: RefCell<Query>,
    visibility: RefCell<VisibilityFn>,
    visible: Cell<bool>,
    observers: ObserverRegistry<GroupEvent>,
}

/// One group of the hierarchy: a visibility flag and a filtered item view.
#[derive(Clone)]
pub struct GroupView {
    inner: Rc<GroupInner>,
}

impl GroupView {
    fn new(group_type: &str, base: &Collection, labels: Vec<String>, query: &Query) -> Self {
        let items = DerivedCollection::new(
            base,
            DerivedOptions::named(format!("{group_type} items"))
                .filter(text_predicate(query.search_text(), &labels))
                .track_order(),
        );
        Self {
            inner: Rc::new(GroupInner {
                group_type: group_type.to_string(),
                labels,
                items,
                query: RefCell::new(query.clone()),
                visibility: RefCell::new(default_visibility()),
                visible: Cell::new(scope_matches(query.scopes(), group_type)),
                observers: ObserverRegistry::new(),
            }),
        }
    }

    /// The group's type.
    pub fn group_type(&self) -> &str {
        &self.inner.group_type
    }

    /// Whether the current scopes admit this group.
    pub fn is_visible(&self) -> bool {
        self.inner.visible.get()
    }

    /// The items matching the current query text.
    pub fn items(&self) -> &DerivedCollection {
        &self.inner.items
    }

    /// Whether `record` is currently shown: the group is visible and the
    /// record is one of its items.
    pub fn shows(&self, record: &Record) -> bool {
        self.is_visible() && self.inner.items.contains(record.id())
    }

    /// Replace the group-level predicate and re-evaluate visibility against
    /// the current query.
    pub fn set_visibility_predicate<F>(&self, predicate: F)
    where
        F: Fn(&Query, &str) -> bool + 'static,
    {
        self.inner.visibility.replace(Rc::new(predicate));
        self.refresh_visibility();
    }

    /// Go back to scope-based visibility.
    pub fn reset_visibility_predicate(&self) {
        self.inner.visibility.replace(default_visibility());
        self.refresh_visibility();
    }

    /// Listen to visibility flips.
    pub fn on_visibility<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&GroupEvent) + 'static,
    {
        self.inner.observers.on(EventKind::Changed, handler)
    }

    /// Stop listening.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.observers.off(id)
    }

    fn apply(&self, query: &Query) {
        let inner = &self.inner;
        inner.query.replace(query.clone());

        let predicate = text_predicate(query.search_text(), &inner.labels);
        if let Err(err) = inner.items.set_predicate(predicate) {
            warn!(group = %inner.group_type, error = %err, "failed to refilter items");
        }

        self.refresh_visibility();
    }

    fn refresh_visibility(&self) {
        let inner = &self.inner;
        let visibility = Rc::clone(&inner.visibility.borrow());
        let query = inner.query.borrow().clone();
        let visible = visibility(&query, &inner.group_type);
        if inner.visible.replace(visible) != visible {
            inner.observers.emit(&GroupEvent {
                group_type: inner.group_type.clone(),
                visible,
            });
        }
    }
}

impl fmt::Debug for GroupView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupView")
            .field("group_type", &self.inner.group_type)
            .field("visible", &self.inner.visible.get())
            .field("items", &self.inner.items.len())
            .finish()
    }
}

struct CascadeInner {
    query: QueryState,
    groups: RefCell<Vec<GroupView>>,
    listener: Cell<Option<ListenerId>>,
}

/// The groups of a display hierarchy, kept in step with a shared query.
#[derive(Clone)]
pub struct Cascade {
    inner: Rc<CascadeInner>,
}

impl Cascade {
    /// Follow `query`.
    pub fn new(query: &QueryState) -> Self {
        let inner = Rc::new(CascadeInner {
            query: query.clone(),
            groups: RefCell::new(Vec::new()),
            listener: Cell::new(None),
        });

        let weak: Weak<CascadeInner> = Rc::downgrade(&inner);
        let listener = query.on_change(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.refresh(&event.query);
            }
        });
        inner.listener.set(Some(listener));
        Self { inner }
    }

    /// Add a group of type `group_type` over `base`, searching `labels`.
    pub fn add_group<S: AsRef<str>>(
        &self,
        group_type: &str,
        base: &Collection,
        labels: &[S],
    ) -> GroupView {
        let labels = labels.iter().map(|l| l.as_ref().to_string()).collect();
        let group = GroupView::new(group_type, base, labels, &self.inner.query.get());
        self.inner.groups.borrow_mut().push(group.clone());
        debug!(group = group_type, base = base.name(), "cascade group added");
        group
    }

    /// The group of type `group_type`.
    pub fn group(&self, group_type: &str) -> Option<GroupView> {
        self.inner
            .groups
            .borrow()
            .iter()
            .find(|g| g.group_type() == group_type)
            .cloned()
    }

    /// All groups, in the order they were added.
    pub fn groups(&self) -> Vec<GroupView> {
        self.inner.groups.borrow().clone()
    }

    /// Group types currently visible.
    pub fn visible_groups(&self) -> Vec<String> {
        self.inner
            .groups
            .borrow()
            .iter()
            .filter(|g| g.is_visible())
            .map(|g| g.group_type().to_string())
            .collect()
    }

    /// The query being followed.
    pub fn query(&self) -> &QueryState {
        &self.inner.query
    }

    /// Stop following the query and release every group's base.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cascade")
            .field("query", &self.inner.query.get())
            .field("groups", &*self.inner.groups.borrow())
            .finish()
    }
}

impl CascadeInner {
    fn refresh(&self, query: &Query) {
        let groups = self.groups.borrow().clone();
        for group in groups {
            group.apply(query);
        }
    }

    fn teardown(&self) {
        if let Some(listener) = self.listener.take() {
            self.query.off(listener);
        }
        for group in self.groups.borrow_mut().drain(..) {
            group.inner.items.teardown();
        }
    }
}

impl Drop for CascadeInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    fn places() -> Collection {
        let c = Collection::named("places");
        c.add(attrs! { "id" => 1, "label" => "River View House" }).unwrap();
        c.add(attrs! { "id" => 2, "label" => "City Hall" }).unwrap();
        c.add(attrs! { "id" => 3, "rdfs_label" => "Riverside Path" }).unwrap();
        c
    }

    fn labels(group: &GroupView) -> Vec<String> {
        group
            .items()
            .records()
            .iter()
            .filter_map(|r| r.text("label").or_else(|| r.text("rdfs_label")))
            .collect()
    }

    #[test]
    fn text_query_filters_items() {
        let query = QueryState::new();
        let cascade = Cascade::new(&query);
        let group = cascade.add_group("place", &places(), &["label", "rdfs_label"]);
        assert_eq!(group.items().len(), 3);

        query.search("river view");
        assert_eq!(labels(&group), vec!["River View House", "Riverside Path"]);

        query.search("  ");
        assert_eq!(group.items().len(), 3);
    }

    #[test]
    fn scopes_toggle_groups() {
        let query = QueryState::new();
        let cascade = Cascade::new(&query);
        let places = places();
        let people = Collection::named("people");
        people.add(attrs! { "id" => 10, "label" => "Robin Gibson" }).unwrap();

        let place = cascade.add_group("place", &places, &["label"]);
        let person = cascade.add_group("person", &people, &["label"]);

        let flips = Rc::new(RefCell::new(Vec::new()));
        let f = flips.clone();
        person.on_visibility(move |e| f.borrow_mut().push((e.group_type.clone(), e.visible)));

        query.search_in("hall", "place");
        assert_eq!(cascade.visible_groups(), vec!["place"]);
        assert!(!person.is_visible());
        assert_eq!(labels(&place), vec!["City Hall"]);

        let hall = places.get("2").unwrap();
        assert!(place.shows(&hall));
        assert!(!place.shows(&places.get("1").unwrap()));

        query.clear();
        assert_eq!(cascade.visible_groups(), vec!["place", "person"]);
        assert_eq!(
            *flips.borrow(),
            vec![("person".to_string(), false), ("person".to_string(), true)]
        );
    }

    #[test]
    fn every_query_change_refilters_items() {
        let query = QueryState::new();
        let cascade = Cascade::new(&query);
        let group = cascade.add_group("place", &places(), &["label"]);

        let resets = Rc::new(Cell::new(0));
        let r = resets.clone();
        group.items().on(EventKind::Reset, move |_| r.set(r.get() + 1));

        query.search("hall");
        query.search_in("hall", "place");
        query.search_in("hall", "person");
        assert_eq!(resets.get(), 3);
        assert_eq!(labels(&group), vec!["City Hall"]);
    }

    #[test]
    fn custom_visibility_predicate() {
        let query = QueryState::new();
        let cascade = Cascade::new(&query);
        let group = cascade.add_group("place", &places(), &["label"]);

        let flips = Rc::new(RefCell::new(Vec::new()));
        let f = flips.clone();
        group.on_visibility(move |e| f.borrow_mut().push(e.visible));

        // Only visible while something is being searched.
        group.set_visibility_predicate(|q: &Query, _: &str| !q.is_default());
        assert!(!group.is_visible());

        query.search_in("hall", "person");
        assert!(group.is_visible());
        assert_eq!(cascade.visible_groups(), vec!["place"]);

        group.reset_visibility_predicate();
        assert!(!group.is_visible());
        assert_eq!(*flips.borrow(), vec![false, true, false]);
    }

    #[test]
    fn items_follow_base_changes_under_a_query() {
        let query = QueryState::new();
        let cascade = Cascade::new(&query);
        let places = places();
        let group = cascade.add_group("place", &places, &["label"]);

        query.search("hall");
        places.add(attrs! { "id" => 4, "label" => "Town Hall" }).unwrap();
        assert_eq!(labels(&group), vec!["City Hall", "Town Hall"]);

        places.get("1").unwrap().set("label", "Old Hall").unwrap();
        assert_eq!(labels(&group), vec!["Old Hall", "City Hall", "Town Hall"]);
    }

    #[test]
    fn teardown_detaches_everything() {
        let query = QueryState::new();
        let places = places();
        let cascade = Cascade::new(&query);
        cascade.add_group("place", &places, &["label"]);
        assert_eq!(query.listener_count(), 1);
        assert_eq!(places.listener_count(), 1);

        cascade.teardown();
        assert_eq!(query.listener_count(), 0);
        assert_eq!(places.listener_count(), 0);
        assert!(cascade.groups().is_empty());
    }
}
