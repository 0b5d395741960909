//! Named inputs of computed artifacts.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{ComputedCollection, ComputedModel};
use crate::collection::Collection;
use crate::derived::DerivedCollection;
use crate::error::{Error, Result};
use crate::reactive::{EventKind, ListenerId};
use crate::record::Record;

/// Anything a computed artifact can depend on.
#[derive(Clone)]
pub enum SourceHandle {
    /// A plain, derived or computed collection.
    Collection(Collection),
    /// Another computed model.
    Model(ComputedModel),
    /// A single record.
    Record(Record),
}

impl SourceHandle {
    /// Short name of the variant, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SourceHandle::Collection(_) => "collection",
            SourceHandle::Model(_) => "model",
            SourceHandle::Record(_) => "record",
        }
    }

    /// The collection, if this is one.
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            SourceHandle::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// The model, if this is one.
    pub fn as_model(&self) -> Option<&ComputedModel> {
        match self {
            SourceHandle::Model(m) => Some(m),
            _ => None,
        }
    }

    /// The record, if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            SourceHandle::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Forward every notification of the source to `handler`.
    pub(crate) fn subscribe(&self, handler: Rc<dyn Fn(EventKind)>) -> ListenerId {
        match self {
            SourceHandle::Collection(c) => {
                c.on_any(move |event| handler(crate::reactive::Event::kind(event)))
            }
            SourceHandle::Model(m) => m.on_change(move |_| handler(EventKind::Changed)),
            SourceHandle::Record(r) => r.on_change(move |_| handler(EventKind::Changed)),
        }
    }

    pub(crate) fn unsubscribe(&self, listener: ListenerId) -> bool {
        match self {
            SourceHandle::Collection(c) => c.off(listener),
            SourceHandle::Model(m) => m.off(listener),
            SourceHandle::Record(r) => r.off_change(listener),
        }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceHandle::Collection(c) => f.debug_tuple("Collection").field(&c.name()).finish(),
            SourceHandle::Model(m) => f.debug_tuple("Model").field(&m.name()).finish(),
            SourceHandle::Record(r) => f.debug_tuple("Record").field(r.id()).finish(),
        }
    }
}

impl From<Collection> for SourceHandle {
    fn from(c: Collection) -> Self {
        SourceHandle::Collection(c)
    }
}

impl From<&Collection> for SourceHandle {
    fn from(c: &Collection) -> Self {
        SourceHandle::Collection(c.clone())
    }
}

impl From<&DerivedCollection> for SourceHandle {
    fn from(d: &DerivedCollection) -> Self {
        SourceHandle::Collection(d.collection().clone())
    }
}

impl From<&ComputedCollection> for SourceHandle {
    fn from(c: &ComputedCollection) -> Self {
        SourceHandle::Collection(c.collection().clone())
    }
}

impl From<&ComputedModel> for SourceHandle {
    fn from(m: &ComputedModel) -> Self {
        SourceHandle::Model(m.clone())
    }
}

impl From<&Record> for SourceHandle {
    fn from(r: &Record) -> Self {
        SourceHandle::Record(r.clone())
    }
}

/// The named sources a computation reads, in declaration order.
#[derive(Clone, Default)]
pub struct Sources {
    entries: IndexMap<String, SourceHandle>,
}

impl Sources {
    /// No sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source, builder style.
    pub fn with(mut self, name: impl Into<String>, source: impl Into<SourceHandle>) -> Self {
        self.insert(name, source);
        self
    }

    /// Add or replace a source.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        source: impl Into<SourceHandle>,
    ) -> Option<SourceHandle> {
        self.entries.insert(name.into(), source.into())
    }

    /// Look a source up.
    pub fn get(&self, name: &str) -> Option<&SourceHandle> {
        self.entries.get(name)
    }

    /// The named collection.
    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.get(name)
            .and_then(SourceHandle::as_collection)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    /// The named model.
    pub fn model(&self, name: &str) -> Result<&ComputedModel> {
        self.get(name)
            .and_then(SourceHandle::as_model)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    /// The named record.
    pub fn record(&self, name: &str) -> Result<&Record> {
        self.get(name)
            .and_then(SourceHandle::as_record)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    /// Source names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over `(name, source)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceHandle)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no sources.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into this set; `other` wins on name clashes.
    pub fn extend(&mut self, other: Sources) {
        self.entries.extend(other.entries);
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// Live subscriptions of a computed artifact to its sources.
#[derive(Default)]
pub(crate) struct Subscriptions {
    entries: Vec<(SourceHandle, ListenerId)>,
}

impl Subscriptions {
    /// Subscribe `handler` to every source.
    pub(crate) fn bind(sources: &Sources, handler: Rc<dyn Fn(EventKind)>) -> Self {
        let entries = sources
            .iter()
            .map(|(_, source)| (source.clone(), source.subscribe(Rc::clone(&handler))))
            .collect();
        Self { entries }
    }

    /// Number of live listeners.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Unsubscribe from everything and forget the sources.
    pub(crate) fn release(&mut self) {
        for (source, listener) in self.entries.drain(..) {
            source.unsubscribe(listener);
        }
    }
}
