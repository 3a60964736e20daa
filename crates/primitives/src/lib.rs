//! Core types for content-addressed records: identifiers, sources, and the
//! immutable record value itself.

/// Content-hash record identifiers.
pub mod id;
/// Immutable record values.
pub mod record;
/// Remote source identifiers.
pub mod source;

pub use id::{ID_LEN, IdError, RecordId};
pub use record::{Record, SourceHint};
pub use source::{SourceId, SourceIdError};
