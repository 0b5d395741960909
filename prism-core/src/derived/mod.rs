//! Derived Collections
//!
//! A [`DerivedCollection`] is a predicate-filtered, read-through view of one
//! base collection. Views can be stacked: the view of a view is bound to the
//! first view's collection handle and sees its events like any other
//! subscriber.

#[allow(clippy::module_inception)]
mod derived;

pub use derived::{DerivedCollection, DerivedOptions, Predicate};
