//! Shared query state.
//!
//! A query is free text plus a set of group scopes. The default query is
//! blank text in the `all` scope. Any query with blank text collapses to
//! the default, so clearing the search box also clears a scoped search.
//!
//! # Serialized form
//!
//! `<text>/<scope>,<scope>,...` with each part percent-encoded, so the form
//! can be used as a URL path fragment:
//!
//! ```rust
//! use prism_core::query::Query;
//!
//! let query = Query::new("river view", ["architect"]);
//! assert_eq!(query.serialize(), "river%20view/architect");
//! assert_eq!(Query::deserialize("river%20view/architect").unwrap(), query);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::debug;

use super::ALL_SCOPES;
use crate::error::{Error, Result};
use crate::reactive::{Event, EventKind, ListenerId, ObserverRegistry};

/// A search: free text and the group scopes it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    scopes: IndexSet<String>,
}

impl Query {
    /// Build a query. Blank text yields the default query; an empty scope
    /// list means every scope.
    pub fn new<I, S>(text: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = text.into();
        if text.trim().is_empty() {
            return Self::default();
        }

        let mut scopes: IndexSet<String> = scopes
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.is_empty())
            .collect();
        if scopes.is_empty() {
            scopes.insert(ALL_SCOPES.to_string());
        }
        Self { text, scopes }
    }

    /// A query over every scope.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, [ALL_SCOPES])
    }

    /// The free text.
    pub fn search_text(&self) -> &str {
        &self.text
    }

    /// The scopes, in the order given.
    pub fn scopes(&self) -> &IndexSet<String> {
        &self.scopes
    }

    /// True for the default query.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Encode as `<text>/<scope>,...`.
    pub fn serialize(&self) -> String {
        let scopes: Vec<String> = self
            .scopes
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", urlencoding::encode(&self.text), scopes.join(","))
    }

    /// Decode the form produced by [`Query::serialize`].
    pub fn deserialize(input: &str) -> Result<Self> {
        let (text, scopes) = input
            .split_once('/')
            .ok_or_else(|| Error::InvalidQuery(format!("missing `/` in `{input}`")))?;

        let text = decode(text)?;
        let scopes = scopes
            .split(',')
            .map(decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(text, scopes))
    }
}

impl Default for Query {
    fn default() -> Self {
        Self {
            text: String::new(),
            scopes: [ALL_SCOPES.to_string()].into_iter().collect(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn decode(part: &str) -> Result<String> {
    urlencoding::decode(part)
        .map(|s| s.into_owned())
        .map_err(|err| Error::InvalidQuery(format!("`{part}`: {err}")))
}

/// Notification that the shared query changed.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// The query now in effect.
    pub query: Query,
}

impl Event for QueryEvent {
    fn kind(&self) -> EventKind {
        EventKind::Changed
    }
}

struct QueryInner {
    current: RefCell<Query>,
    observers: ObserverRegistry<QueryEvent>,
}

/// The mutable query every level of a display hierarchy observes.
///
/// `QueryState` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct QueryState {
    inner: Rc<QueryInner>,
}

impl QueryState {
    /// State holding the default query.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(QueryInner {
                current: RefCell::new(Query::default()),
                observers: ObserverRegistry::new(),
            }),
        }
    }

    /// The query in effect.
    pub fn get(&self) -> Query {
        self.inner.current.borrow().clone()
    }

    /// Replace the query. Emits `changed` unless the query is unchanged.
    ///
    /// Returns whether anything changed.
    pub fn set(&self, query: Query) -> bool {
        if *self.inner.current.borrow() == query {
            return false;
        }
        debug!(query = %query, "query changed");
        self.inner.current.replace(query.clone());
        self.inner.observers.emit(&QueryEvent { query });
        true
    }

    /// Search every scope for `text`.
    pub fn search(&self, text: &str) -> bool {
        self.set(Query::text(text))
    }

    /// Search one group type for `text`.
    pub fn search_in(&self, text: &str, group_type: &str) -> bool {
        self.set(Query::new(text, [group_type]))
    }

    /// Back to the default query.
    pub fn clear(&self) -> bool {
        self.set(Query::default())
    }

    /// Encoded form of the query in effect.
    pub fn serialize(&self) -> String {
        self.inner.current.borrow().serialize()
    }

    /// Replace the query with a decoded one. Leaves the state untouched on
    /// malformed input.
    pub fn restore(&self, serialized: &str) -> Result<bool> {
        Ok(self.set(Query::deserialize(serialized)?))
    }

    /// Listen to query changes.
    pub fn on_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&QueryEvent) + 'static,
    {
        self.inner.observers.on(EventKind::Changed, handler)
    }

    /// Stop listening.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.observers.off(id)
    }

    /// Number of registered handlers.
    pub fn listener_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl Default for QueryState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("query", &*self.inner.current.borrow())
            .finish()
    }
}
