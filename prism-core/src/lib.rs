//! Prism Core
//!
//! This crate provides a reactive derived-collection engine: declare views
//! over mutable record collections and they stay consistent with their
//! sources without manual refresh calls.
//!
//! It implements:
//!
//! - Observable collections of uniquely keyed records
//! - Derived collections: live, predicate-filtered views of one base
//! - Computed models and collections: pure functions of named sources
//! - Debounced recomputation on a single-threaded event loop
//! - A query-driven predicate cascade for two-level displays
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `record`: records and attribute values
//! - `reactive`: observer registries, identifiers and the reentrancy guard
//! - `collection`: the observable collection
//! - `derived`: filtered views
//! - `computed`: computed models and collections
//! - `schedule`: event loop, clocks and debouncing
//! - `graph`: the artifact dependency graph
//! - `registry`: name-addressed artifacts
//! - `query`: query state and the predicate cascade
//! - `fetch`: populating collections from an external source
//!
//! Everything is single-threaded. Propagation is synchronous and depth-first:
//! when a mutating call returns, every dependent artifact is up to date,
//! except where a debounce policy defers the work to an event loop.
//!
//! # Example
//!
//! ```rust
//! use prism_core::{attrs, Collection, DerivedCollection, DerivedOptions};
//!
//! let base = Collection::named("entities");
//! base.add(attrs! { "id" => 1, "type" => "A" }).unwrap();
//! base.add(attrs! { "id" => 2, "type" => "B" }).unwrap();
//! base.add(attrs! { "id" => 3, "type" => "A" }).unwrap();
//!
//! let a = DerivedCollection::new(
//!     &base,
//!     DerivedOptions::named("a")
//!         .filter(|r| r.text("type").as_deref() == Some("A"))
//!         .track_order(),
//! );
//!
//! base.add(attrs! { "id" => 4, "type" => "A" }).unwrap();
//! base.remove("1").unwrap();
//!
//! let ids: Vec<String> = a.ids().iter().map(|id| id.to_string()).collect();
//! assert_eq!(ids, ["3", "4"]);
//! ```

pub mod collection;
pub mod computed;
pub mod derived;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod query;
pub mod reactive;
pub mod record;
pub mod registry;
pub mod schedule;

pub use collection::{
    AddOptions, Collection, CollectionEvent, CollectionOptions, Comparator, SortOptions,
};
pub use computed::{ComputedCollection, ComputedModel, ModelEvent, SourceHandle, Sources};
pub use derived::{DerivedCollection, DerivedOptions, Predicate};
pub use error::{Error, Result};
pub use fetch::{Fetch, Resource};
pub use query::{Cascade, GroupView, Query, QueryState};
pub use reactive::{EventKind, ListenerId};
pub use record::{Attributes, Record, RecordId, Value};
pub use registry::{Artifact, Registry};
pub use schedule::{Debounce, DebounceEdge, EventLoop, ManualClock, SystemClock};
