//! Record Implementation
//!
//! A Record is a uniquely keyed attribute bag. Records are shared handles:
//! the same record may sit in a base collection and in any number of derived
//! views at once, and cloning a `Record` clones the handle, not the data.
//!
//! Records can be mutated in place with [`Record::set`] and
//! [`Record::merge`]. Every effective mutation is announced through the
//! record's own observer registry; collections holding the record listen to
//! it and re-emit a `changed` event.
//!
//! The identity attribute is fixed at construction. Attempts to change it are
//! rejected, since the collections holding the record index it by identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Value;
use crate::error::{Error, Result};
use crate::reactive::{Event, EventKind, ListenerId, ObserverRegistry};

/// Default name of the identity attribute.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Attribute map. Keeps insertion order so snapshots are deterministic.
pub type Attributes = IndexMap<String, Value>;

/// The identity value of a record, normalised to a string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Derive an identity from an attribute value.
    ///
    /// Text and numbers are valid identities; integral numbers render
    /// without a fractional part, so `4` and `4.0` are the same key. Lists and
    /// empty strings are not identities.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) if n.is_finite() => Some(Self(Value::Number(*n).to_string())),
            _ => None,
        }
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&RecordId> for RecordId {
    fn from(id: &RecordId) -> Self {
        id.clone()
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl From<i32> for RecordId {
    fn from(n: i32) -> Self {
        Self(n.to_string())
    }
}

impl From<&Record> for RecordId {
    fn from(record: &Record) -> Self {
        record.id().clone()
    }
}

/// Notification that a record's attributes changed in place.
#[derive(Debug, Clone)]
pub struct RecordChange {
    /// The record that changed.
    pub record: Record,
    /// Names of the attributes whose value changed, in update order.
    pub keys: Vec<String>,
}

impl Event for RecordChange {
    fn kind(&self) -> EventKind {
        EventKind::Changed
    }
}

struct RecordInner {
    id: RecordId,
    id_attribute: String,
    attributes: RefCell<Attributes>,
    observers: ObserverRegistry<RecordChange>,
}

/// A shared, mutable, uniquely identified attribute bag.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

impl Record {
    /// Create a record keyed by the default `id` attribute.
    pub fn new(attributes: Attributes) -> Result<Self> {
        Self::with_id_attribute(DEFAULT_ID_ATTRIBUTE, attributes)
    }

    /// Create a record keyed by `id_attribute`.
    ///
    /// Fails with [`Error::InvalidRecord`] if the attribute is missing or its
    /// value cannot serve as an identity.
    pub fn with_id_attribute(id_attribute: &str, attributes: Attributes) -> Result<Self> {
        let value = attributes.get(id_attribute).ok_or_else(|| {
            Error::InvalidRecord(format!("missing identity attribute `{id_attribute}`"))
        })?;
        let id = RecordId::from_value(value).ok_or_else(|| {
            Error::InvalidRecord(format!(
                "identity attribute `{id_attribute}` has unusable value `{value}`"
            ))
        })?;

        Ok(Self {
            inner: Rc::new(RecordInner {
                id,
                id_attribute: id_attribute.to_string(),
                attributes: RefCell::new(attributes),
                observers: ObserverRegistry::new(),
            }),
        })
    }

    /// The record's identity.
    pub fn id(&self) -> &RecordId {
        &self.inner.id
    }

    /// Name of the identity attribute.
    pub fn id_attribute(&self) -> &str {
        &self.inner.id_attribute
    }

    /// Get an attribute value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.attributes.borrow().get(key).cloned()
    }

    /// Get a text attribute.
    pub fn text(&self, key: &str) -> Option<String> {
        self.inner
            .attributes
            .borrow()
            .get(key)
            .and_then(|v| v.as_text().map(str::to_string))
    }

    /// Check whether an attribute is present.
    pub fn has(&self, key: &str) -> bool {
        self.inner.attributes.borrow().contains_key(key)
    }

    /// Run `f` against the attributes without cloning them.
    pub fn with_attributes<R>(&self, f: impl FnOnce(&Attributes) -> R) -> R {
        f(&self.inner.attributes.borrow())
    }

    /// Clone the current attributes.
    pub fn attributes(&self) -> Attributes {
        self.inner.attributes.borrow().clone()
    }

    /// Set one attribute.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let mut attrs = Attributes::new();
        attrs.insert(key.into(), value.into());
        self.merge(attrs).map(|_| ())
    }

    /// Merge `attributes` into the record.
    ///
    /// Attributes absent from `attributes` are kept. Returns the names of the
    /// attributes that actually changed and emits one change notification if
    /// that list is non-empty. Fails with [`Error::InvalidRecord`] without
    /// touching anything if the merge would change the identity.
    pub fn merge(&self, attributes: Attributes) -> Result<Vec<String>> {
        if let Some(value) = attributes.get(&self.inner.id_attribute) {
            if RecordId::from_value(value).as_ref() != Some(&self.inner.id) {
                return Err(Error::InvalidRecord(format!(
                    "cannot change identity of record {} to `{value}`",
                    self.inner.id
                )));
            }
        }

        let changed: Vec<String> = {
            let mut current = self.inner.attributes.borrow_mut();
            let mut changed = Vec::new();
            for (key, value) in attributes {
                if current.get(&key) != Some(&value) {
                    current.insert(key.clone(), value);
                    changed.push(key);
                }
            }
            changed
        };

        if !changed.is_empty() {
            trace!(record = %self.inner.id, keys = ?changed, "record changed");
            self.inner.observers.emit(&RecordChange {
                record: self.clone(),
                keys: changed.clone(),
            });
        }

        Ok(changed)
    }

    /// Replace the attributes with exactly `attributes`.
    ///
    /// Attributes absent from `attributes` are removed, except the identity
    /// attribute, which is always kept. Returns the names of the attributes
    /// that changed or went away and emits one change notification if that
    /// list is non-empty. Fails like [`Record::merge`] on an identity change.
    pub fn replace(&self, attributes: Attributes) -> Result<Vec<String>> {
        if let Some(value) = attributes.get(&self.inner.id_attribute) {
            if RecordId::from_value(value).as_ref() != Some(&self.inner.id) {
                return Err(Error::InvalidRecord(format!(
                    "cannot change identity of record {} to `{value}`",
                    self.inner.id
                )));
            }
        }

        let changed: Vec<String> = {
            let mut current = self.inner.attributes.borrow_mut();
            let mut changed = Vec::new();
            for (key, value) in &attributes {
                if current.get(key) != Some(value) {
                    current.insert(key.clone(), value.clone());
                    changed.push(key.clone());
                }
            }
            let id_attribute = &self.inner.id_attribute;
            current.retain(|key, _| {
                let keep = key == id_attribute || attributes.contains_key(key);
                if !keep {
                    changed.push(key.clone());
                }
                keep
            });
            changed
        };

        if !changed.is_empty() {
            trace!(record = %self.inner.id, keys = ?changed, "record replaced");
            self.inner.observers.emit(&RecordChange {
                record: self.clone(),
                keys: changed.clone(),
            });
        }

        Ok(changed)
    }

    /// Listen to in-place changes of this record.
    pub fn on_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&RecordChange) + 'static,
    {
        self.inner.observers.on(EventKind::Changed, handler)
    }

    /// Stop listening.
    pub fn off_change(&self, id: ListenerId) -> bool {
        self.inner.observers.off(id)
    }

    /// True if both handles point at the same record.
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.inner.id)
            .field("attributes", &*self.inner.attributes.borrow())
            .finish()
    }
}

/// Build an [`Attributes`] map from `key => value` pairs.
///
/// ```rust
/// use prism_core::attrs;
///
/// let a = attrs! { "id" => 1, "type" => "A" };
/// assert_eq!(a.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::record::Attributes::new();
        $(map.insert(::std::string::String::from($key), $crate::record::Value::from($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use std::cell::Cell;

    #[test]
    fn identity_from_attribute() {
        let r = Record::new(attrs! { "id" => 4, "type" => "A" }).unwrap();
        assert_eq!(r.id(), &RecordId::from("4"));
        assert_eq!(r.id_attribute(), "id");

        let r = Record::with_id_attribute("uri", attrs! { "uri" => "urn:x" }).unwrap();
        assert_eq!(r.id().as_str(), "urn:x");
    }

    #[test]
    fn missing_identity_is_invalid() {
        let err = Record::new(attrs! { "type" => "A" }).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));

        let err = Record::new(attrs! { "id" => vec!["a"] }).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));

        let err = Record::new(attrs! { "id" => "" }).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn merge_reports_only_changed_keys() {
        let r = Record::new(attrs! { "id" => 1, "type" => "A", "title" => "x" }).unwrap();
        let changed = r.merge(attrs! { "type" => "A", "title" => "y", "extra" => 2 }).unwrap();
        assert_eq!(changed, vec!["title".to_string(), "extra".to_string()]);
        assert_eq!(r.text("title").as_deref(), Some("y"));
    }

    #[test]
    fn replace_drops_missing_keys() {
        let r = Record::new(attrs! { "id" => 1, "flag" => "on", "title" => "x" }).unwrap();
        let keys = Rc::new(RefCell::new(Vec::new()));
        let k = keys.clone();
        r.on_change(move |change| k.borrow_mut().push(change.keys.clone()));

        let changed = r.replace(attrs! { "title" => "y" }).unwrap();
        assert_eq!(changed, vec!["title".to_string(), "flag".to_string()]);
        assert!(!r.has("flag"));
        assert_eq!(r.get("id"), Some(Value::from(1)));
        assert_eq!(keys.borrow().len(), 1);

        assert!(r.replace(attrs! { "id" => 1, "title" => "y" }).unwrap().is_empty());
        assert_eq!(keys.borrow().len(), 1);
        assert!(r.replace(attrs! { "id" => 2 }).is_err());
    }

    #[test]
    fn identity_cannot_change() {
        let r = Record::new(attrs! { "id" => 1, "title" => "x" }).unwrap();
        let err = r.merge(attrs! { "id" => 2, "title" => "y" }).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        // Nothing was applied.
        assert_eq!(r.text("title").as_deref(), Some("x"));

        // Restating the same identity is fine.
        assert!(r.set("id", 1).is_ok());
    }

    #[test]
    fn change_notifications_fire_once_per_effective_mutation() {
        let r = Record::new(attrs! { "id" => 1, "title" => "x" }).unwrap();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let id = r.on_change(move |change| {
            assert_eq!(change.keys, vec!["title".to_string()]);
            c.set(c.get() + 1);
        });

        r.set("title", "y").unwrap();
        r.set("title", "y").unwrap();
        assert_eq!(count.get(), 1);

        r.off_change(id);
        r.set("title", "z").unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn clones_share_state() {
        let a = Record::new(attrs! { "id" => 1 }).unwrap();
        let b = a.clone();
        b.set("title", "shared").unwrap();
        assert_eq!(a.text("title").as_deref(), Some("shared"));
        assert!(a.ptr_eq(&b));
    }
}
