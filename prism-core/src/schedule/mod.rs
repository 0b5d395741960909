//! Deferred Work
//!
//! Propagation is synchronous everywhere except where a computed artifact is
//! debounced. Debounced recomputation is parked on an [`EventLoop`], a
//! single-threaded delayed-task queue driven by a [`Clock`]. The engine
//! never spawns threads; whoever owns the loop decides when it turns.

mod clock;
mod debounce;
mod event_loop;

pub use clock::{Clock, ManualClock, SystemClock};
pub use debounce::{Debounce, DebounceEdge, Debouncer};
pub use event_loop::{EventLoop, TaskId};
