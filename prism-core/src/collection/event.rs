//! Collection notifications.

use crate::reactive::{Event, EventKind};
use crate::record::Record;

/// A notification emitted by a collection after a mutation completes.
///
/// Exactly one event is emitted per logical mutation; an `add` that moves
/// other members as a side effect is followed by one `Sort`.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// A record joined the membership, or was merged into the member that
    /// shares its identity (`merged == true`).
    Add {
        record: Record,
        index: usize,
        merged: bool,
    },
    /// A record left the membership. `index` is where it used to be.
    Remove { record: Record, index: usize },
    /// The membership was replaced in one step.
    Reset { records: Vec<Record> },
    /// The order of the membership changed.
    Sort,
    /// A member's attributes changed in place.
    Changed { record: Record, keys: Vec<String> },
}

impl CollectionEvent {
    /// The record this event is about, if it concerns a single record.
    pub fn record(&self) -> Option<&Record> {
        match self {
            CollectionEvent::Add { record, .. }
            | CollectionEvent::Remove { record, .. }
            | CollectionEvent::Changed { record, .. } => Some(record),
            CollectionEvent::Reset { .. } | CollectionEvent::Sort => None,
        }
    }
}

impl Event for CollectionEvent {
    fn kind(&self) -> EventKind {
        match self {
            CollectionEvent::Add { .. } => EventKind::Add,
            CollectionEvent::Remove { .. } => EventKind::Remove,
            CollectionEvent::Reset { .. } => EventKind::Reset,
            CollectionEvent::Sort => EventKind::Sort,
            CollectionEvent::Changed { .. } => EventKind::Changed,
        }
    }
}
