use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::{RecordId, SourceId};

/// Origin metadata carried alongside a record.
///
/// The fetch engine never interprets these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceHint {
	/// Author key, if known.
	pub author: Option<Arc<str>>,
	/// Creation timestamp in seconds, if known.
	pub created_at: Option<u64>,
}

/// An immutable, content-addressed record.
///
/// A record is never mutated in place. Observing it on another source
/// produces a new value via [`Record::with_seen_on`] that carries the same id
/// and payload with a wider `seen_on` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
	id: RecordId,
	hint: SourceHint,
	payload: Bytes,
	seen_on: BTreeSet<SourceId>,
}

impl Record {
	/// Creates a record with no hint and no confirming sources.
	pub fn new(id: RecordId, payload: impl Into<Bytes>) -> Self {
		Self {
			id,
			hint: SourceHint::default(),
			payload: payload.into(),
			seen_on: BTreeSet::new(),
		}
	}

	/// Attaches origin metadata.
	#[must_use]
	pub fn with_hint(mut self, hint: SourceHint) -> Self {
		self.hint = hint;
		self
	}

	/// Returns a copy confirmed by `source` in addition to the current set.
	#[must_use]
	pub fn with_seen_on(mut self, source: SourceId) -> Self {
		self.seen_on.insert(source);
		self
	}

	/// Returns a copy whose `seen_on` is the union with `sources`.
	#[must_use]
	pub fn merge_seen_on<'a>(mut self, sources: impl IntoIterator<Item = &'a SourceId>) -> Self {
		self.seen_on.extend(sources.into_iter().cloned());
		self
	}

	pub fn id(&self) -> RecordId {
		self.id
	}

	pub fn hint(&self) -> &SourceHint {
		&self.hint
	}

	pub fn payload(&self) -> &Bytes {
		&self.payload
	}

	/// Sources that have confirmed holding this record.
	pub fn seen_on(&self) -> &BTreeSet<SourceId> {
		&self.seen_on
	}

	pub fn is_seen_on(&self, source: &SourceId) -> bool {
		self.seen_on.contains(source)
	}
}
