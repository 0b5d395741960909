//! Error types for the derived-collection engine.
//!
//! Every failure is local and synchronous: it is returned from the call that
//! caused it and leaves the previous state untouched. Nothing is retried
//! internally.

use thiserror::Error;

use crate::record::RecordId;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by collections, derived artifacts and their collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A record is missing its identity attribute, or the identity value
    /// cannot serve as a key.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A direct mutation of a derived collection would break its predicate.
    #[error("record {record} does not satisfy the predicate of `{collection}`")]
    PredicateViolation {
        /// Name of the derived collection.
        collection: String,
        /// Identity of the offending record.
        record: RecordId,
    },

    /// A derived artifact was bound to a name that was never registered.
    #[error("unknown source `{0}`")]
    UnknownSource(String),

    /// A recomputation or mutation was requested for an artifact that is
    /// already in the middle of one.
    #[error("reentrant mutation of `{0}`")]
    ReentrantMutation(String),

    /// An external caller tried to mutate a computed collection directly.
    #[error("`{0}` is computed from its sources and cannot be mutated directly")]
    ReadOnly(String),

    /// Binding would introduce a cycle in the dependency graph.
    #[error("binding `{dependent}` to `{upstream}` would create a dependency cycle")]
    DependencyCycle {
        /// The artifact being bound.
        dependent: String,
        /// The source it was bound to.
        upstream: String,
    },

    /// A source name is already taken in the registry.
    #[error("source `{0}` is already registered")]
    DuplicateSource(String),

    /// The external fetch collaborator reported a failure.
    #[error("fetch from `{endpoint}` failed: {reason}")]
    Fetch {
        /// Endpoint that was requested.
        endpoint: String,
        /// Collaborator-provided reason.
        reason: String,
    },

    /// A fetched payload could not be decoded.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A serialized query string could not be parsed.
    #[error("invalid query `{0}`")]
    InvalidQuery(String),
}
