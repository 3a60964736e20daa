//! Tracking of locally published records as sources acknowledge them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fetchcast_cell::Cell;
use fetchcast_primitives::{Record, RecordId, SourceId};
use futures::StreamExt;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Coordinator;
use crate::remote::{PublishAck, RemotePublisher};
use crate::task::{self, TaskClass};

/// Acknowledgement state of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStatus {
	/// Latest acknowledgement from each source.
	pub acks: BTreeMap<SourceId, PublishAck>,
	/// `true` once every source finished answering.
	pub done: bool,
}

impl PublishStatus {
	/// Sources that accepted the record.
	pub fn accepted(&self) -> impl Iterator<Item = &SourceId> {
		self.acks.values().filter(|ack| ack.ok).map(|ack| &ack.source)
	}

	/// Sources that rejected the record or could not be reached.
	pub fn rejected(&self) -> impl Iterator<Item = &SourceId> {
		self.acks.values().filter(|ack| !ack.ok).map(|ack| &ack.source)
	}
}

/// One published record and the broadcast of its acknowledgements.
#[derive(Debug, Clone)]
pub struct PublishEntry {
	id: Uuid,
	label: Arc<str>,
	record_id: RecordId,
	sources: Arc<[SourceId]>,
	status: Cell<PublishStatus>,
}

impl PublishEntry {
	fn new(label: &str, record_id: RecordId, sources: Vec<SourceId>) -> Self {
		Self {
			id: Uuid::new_v4(),
			label: Arc::from(label),
			record_id,
			sources: sources.into(),
			status: Cell::with_value(PublishStatus::default()),
		}
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	/// Caller supplied description, such as "Reply" or "Reaction".
	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn record_id(&self) -> RecordId {
		self.record_id
	}

	/// Sources the record was sent to.
	pub fn sources(&self) -> &[SourceId] {
		&self.sources
	}

	/// Status cell, updated on every acknowledgement.
	pub fn status(&self) -> &Cell<PublishStatus> {
		&self.status
	}

	pub fn is_done(&self) -> bool {
		self.status.get().is_some_and(|s| s.done)
	}

	/// Resolves with the final status once every source has finished.
	pub async fn wait_done(&self) -> PublishStatus {
		let mut rx = self.status.stream();
		while let Some(status) = rx.recv().await {
			if status.done {
				return status;
			}
		}
		self.status.get().unwrap_or_default()
	}

	fn apply_ack(&self, ack: PublishAck) {
		self.status.update(|current| {
			let mut next = current.cloned().unwrap_or_default();
			next.acks.insert(ack.source.clone(), ack);
			next
		});
	}

	fn finish(&self) {
		self.status.update(|current| {
			let mut next = current.cloned().unwrap_or_default();
			next.done = true;
			next
		});
	}
}

/// Ordered history of publishes made through one coordinator.
#[derive(Debug, Default)]
pub struct PublishLog {
	entries: RwLock<Vec<PublishEntry>>,
}

impl PublishLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&self, entry: PublishEntry) {
		self.entries.write().push(entry);
	}

	/// Entries in publish order.
	pub fn entries(&self) -> Vec<PublishEntry> {
		self.entries.read().clone()
	}

	pub fn get(&self, id: Uuid) -> Option<PublishEntry> {
		self.entries.read().iter().find(|e| e.id == id).cloned()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl Coordinator {
	/// Publishes `record` locally (see [`Coordinator::publish`]) and sends it
	/// to every source in `sources`.
	///
	/// Each accepting source is added to the record's `seen_on` set in its
	/// cell. The returned entry is also appended to
	/// [`publish_log`](Coordinator::publish_log).
	pub async fn publish_to<I>(&self, label: &str, record: Record, sources: I, publisher: Arc<dyn RemotePublisher>) -> PublishEntry
	where
		I: IntoIterator<Item = SourceId>,
	{
		let sources: Vec<SourceId> = sources.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
		let entry = PublishEntry::new(label, record.id(), sources.clone());
		self.publish_log().push(entry.clone());
		self.publish(record.clone()).await;

		debug!(entry = %entry.id, label, id = %record.id().short(), sources = sources.len(), "fetch.publish");
		if sources.is_empty() {
			entry.finish();
			return entry;
		}

		let inner = Arc::clone(self.inner());
		let guard = inner.track();
		let tracked = entry.clone();
		task::spawn(TaskClass::Publish, async move {
			let _guard = guard;
			let sends = sources.into_iter().map(|source| {
				let publisher = Arc::clone(&publisher);
				let record = record.clone();
				let inner = Arc::clone(&inner);
				let entry = tracked.clone();
				async move {
					let mut acks = match publisher.send(&source, &record).await {
						Ok(acks) => acks,
						Err(error) => {
							warn!(entry = %entry.id, source = %source, %error, "fetch.publish.failed");
							entry.apply_ack(PublishAck {
								source,
								ok: false,
								message: Some(error.to_string()),
							});
							return;
						}
					};
					while let Some(ack) = acks.next().await {
						if ack.ok {
							let seen = ack.source.clone();
							let fallback = record.clone();
							inner.cells().get_or_create(&record.id()).update(move |current| {
								current.cloned().unwrap_or(fallback).with_seen_on(seen)
							});
						}
						entry.apply_ack(ack);
					}
				}
			});

			tokio::select! {
				_ = inner.cancel_token().cancelled() => {
					debug!(entry = %tracked.id, "fetch.publish.cancelled");
				}
				_ = futures::future::join_all(sends) => {}
			}
			tracked.finish();
		});

		entry
	}
}
