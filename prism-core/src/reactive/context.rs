//! Recompute Context
//!
//! Tracks which artifacts are currently mutating or recomputing on this
//! thread. Propagation is synchronous and depth-first, so a chain of nested
//! recomputations is a stack: a base collection's `add` runs its listeners,
//! which update a derived view, which in turn recomputes a computed model.
//!
//! An artifact that shows up twice on the stack is being re-entered, for
//! example by a comparator that mutates the collection it sorts, or by a
//! compute function that asks its own model to recompute. That request is
//! rejected with [`Error::ReentrantMutation`] before it can touch any state.

use std::cell::RefCell;

use tracing::warn;

use super::ArtifactId;
use crate::error::{Error, Result};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ArtifactId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if a user callback panics.
#[must_use = "the artifact leaves the context as soon as the guard is dropped"]
pub struct RecomputeContext {
    artifact: ArtifactId,
}

impl RecomputeContext {
    /// Enter the context for `artifact`.
    ///
    /// Fails with [`Error::ReentrantMutation`] if the artifact is already on
    /// the stack. `name` is only used for the error and the log line.
    pub fn enter(artifact: ArtifactId, name: &str) -> Result<Self> {
        let reentered = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&artifact) {
                true
            } else {
                stack.push(artifact);
                false
            }
        });

        if reentered {
            warn!(artifact = %artifact, name, "rejected reentrant mutation");
            return Err(Error::ReentrantMutation(name.to_string()));
        }

        Ok(Self { artifact })
    }

    /// Check whether `artifact` is currently mutating or recomputing.
    pub fn is_active(artifact: ArtifactId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().contains(&artifact))
    }

    /// Number of nested recomputations in flight.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for RecomputeContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(top) = popped {
                debug_assert_eq!(
                    top, self.artifact,
                    "RecomputeContext mismatch: expected {:?}, got {:?}",
                    self.artifact, top
                );
            }
        });
    }
}
