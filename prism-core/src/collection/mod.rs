//! Observable Collections
//!
//! A [`Collection`] holds an ordered, de-duplicated set of records and
//! announces every mutation to its subscribers.
//!
//! # Events
//!
//! | mutation            | emitted                                   |
//! |---------------------|-------------------------------------------|
//! | `add` (new)         | `Add { merged: false }`                   |
//! | `add` (same id)     | `Add { merged: true }`, then `Sort` if moved |
//! | `remove`            | `Remove`, nothing if absent               |
//! | `reset`             | one `Reset` with the full new membership  |
//! | `sort`              | `Sort` if the order changed               |
//! | member `set`/`merge`| `Changed`, then `Sort` if moved           |
//!
//! Events are delivered synchronously, before the mutating call returns.

#[allow(clippy::module_inception)]
mod collection;
mod comparator;
mod event;

pub use collection::{
    AddOptions, Collection, CollectionOptions, IntoRecord, RecordKey, SortOptions,
};
pub(crate) use collection::MutationGate;
pub use comparator::Comparator;
pub use event::CollectionEvent;
