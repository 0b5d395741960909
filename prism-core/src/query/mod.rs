//! Query-Driven Visibility
//!
//! A shared [`QueryState`] (free text plus a set of group scopes) is the only
//! external trigger of a predicate cascade. The matching functions are pure:
//! visibility is always a function of the query and the record state, never
//! of what was shown before.

mod cascade;
mod matching;
mod state;

/// The scope that admits every group.
pub const ALL_SCOPES: &str = "all";

pub use cascade::{Cascade, GroupEvent, GroupView, VisibilityFn};
pub use matching::{scope_matches, text_matches, text_predicate};
pub use state::{Query, QueryEvent, QueryState};
