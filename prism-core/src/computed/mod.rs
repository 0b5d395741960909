//! Computed Artifacts
//!
//! Computed artifacts aggregate one or more named sources:
//!
//! - [`ComputedModel`]: named attributes, each a function of the sources.
//! - [`ComputedCollection`]: a keyed membership, a function of the sources.
//!
//! Both recompute everything on any source notification. Recomputation runs
//! synchronously inside the source's mutating call unless a [`Debounce`]
//! policy parks it on an event loop.
//!
//! [`Debounce`]: crate::schedule::Debounce

mod collection;
mod model;
mod sources;

pub use collection::{ComputedCollection, ComputedCollectionBuilder, MembersFn};
pub use model::{AttributeFn, ComputedModel, ModelBuilder, ModelEvent};
pub use sources::{SourceHandle, Sources};
