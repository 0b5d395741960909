//! Reactive Plumbing
//!
//! The pieces every observable artifact is built from: identifiers, the
//! per-artifact observer registry, and the recompute context that guards
//! against reentrancy.
//!
//! # Concepts
//!
//! ## Observer registry
//!
//! Each collection, derived view and computed model owns an
//! [`ObserverRegistry`]. Consumers register handlers with `on` and get a
//! [`ListenerId`] back, which `off` takes to unregister. Delivery is
//! synchronous, in registration order.
//!
//! ## Recompute context
//!
//! Propagation runs depth-first on one thread. [`RecomputeContext`] keeps the
//! stack of artifacts currently mutating so that an artifact re-entered from
//! its own callbacks is detected instead of corrupting half-updated state.

mod context;
mod ids;
mod observer;

pub use context::RecomputeContext;
pub use ids::{ArtifactId, ListenerId};
pub use observer::{Event, EventKind, ObserverRegistry};
