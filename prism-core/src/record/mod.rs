//! Records and their attribute values.

#[allow(clippy::module_inception)]
mod record;
mod value;

pub use record::{Attributes, Record, RecordChange, RecordId, DEFAULT_ID_ATTRIBUTE};
pub use value::Value;
