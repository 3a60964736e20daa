use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use fetchcast_primitives::{RecordId, SourceId};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::Inner;
use crate::task::{self, TaskClass};

/// Ids written, or being written, to the local cache during one cycle.
type Persisted = Arc<Mutex<HashSet<RecordId>>>;

/// Inverts `id -> sources` into `source -> ids`. An id with several
/// candidate sources appears in each of their groups.
pub(super) fn group_by_source(pending: HashMap<RecordId, BTreeSet<SourceId>>) -> BTreeMap<SourceId, Vec<RecordId>> {
	let mut groups: BTreeMap<SourceId, Vec<RecordId>> = BTreeMap::new();
	for (id, sources) in pending {
		for source in sources {
			groups.entry(source).or_default().push(id);
		}
	}
	for ids in groups.values_mut() {
		ids.sort_unstable();
	}
	groups
}

impl Inner {
	/// Resolves one snapshot of the pending set.
	///
	/// Returns once the cache pass is done and every source request has been
	/// spawned; the requests keep streaming in the background.
	pub(super) async fn drain(self: &Arc<Self>, batch: HashMap<RecordId, BTreeSet<SourceId>>) {
		let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
		let ids: Vec<RecordId> = batch.keys().copied().collect();
		let mut remaining = batch;

		let cached = match self.cache.query(&ids).await {
			Ok(records) => records,
			Err(error) => {
				warn!(cycle, %error, "fetch.cache.query_failed");
				Vec::new()
			}
		};

		let mut loaded = 0usize;
		for record in cached {
			// Anything the cache returns beyond what was asked is ignored.
			if remaining.remove(&record.id()).is_some() {
				self.deliver(record, None);
				loaded += 1;
			}
		}
		if loaded > 0 {
			debug!(cycle, loaded, "fetch.drain.cache_hits");
		}

		let groups = group_by_source(remaining);
		debug!(cycle, requested = ids.len(), cached = loaded, sources = groups.len(), "fetch.drain");

		if groups.is_empty() || self.cancel.is_cancelled() {
			return;
		}

		let persisted: Persisted = Arc::default();
		for (source, ids) in groups {
			self.spawn_source_request(cycle, source, ids, Arc::clone(&persisted));
		}
	}

	fn spawn_source_request(self: &Arc<Self>, cycle: u64, source: SourceId, ids: Vec<RecordId>, persisted: Persisted) {
		let guard = self.track();
		let inner = Arc::clone(self);
		task::spawn(TaskClass::SourceRequest, async move {
			let _guard = guard;
			tokio::select! {
				_ = inner.cancel.cancelled() => {
					trace!(cycle, source = %source, "fetch.source.cancelled");
				}
				_ = inner.fetch_from(cycle, &source, ids, &persisted) => {}
			}
		});
	}

	/// Streams one source group's answers into cells, persisting each id once
	/// per cycle. An arrival whose write fails leaves the id to the next one.
	async fn fetch_from(&self, cycle: u64, source: &SourceId, ids: Vec<RecordId>, persisted: &Mutex<HashSet<RecordId>>) {
		let wanted: HashSet<RecordId> = ids.iter().copied().collect();
		let started = Instant::now();
		trace!(cycle, source = %source, ids = ids.len(), "fetch.source.request");
		self.scoreboard.record_request(source);

		let mut stream = match self.remote.fetch(source, ids).await {
			Ok(stream) => stream,
			Err(error) => {
				warn!(cycle, source = %source, %error, "fetch.source.failed");
				self.scoreboard.record_failure(source);
				return;
			}
		};

		let mut received = 0u64;
		while let Some(record) = stream.next().await {
			let id = record.id();
			if !wanted.contains(&id) {
				trace!(cycle, source = %source, id = %id.short(), "fetch.source.unrequested");
				continue;
			}
			if received == 0 {
				self.scoreboard.record_first_record(source, started.elapsed());
			}
			received += 1;

			let stored = self.deliver(record, Some(source));
			let first = persisted.lock().insert(id);
			if first && !self.persist(&stored).await {
				// Let a later arrival of this id retry the write.
				persisted.lock().remove(&id);
			}
		}

		self.scoreboard.record_complete(source, received);
		debug!(cycle, source = %source, received, "fetch.source.complete");
	}
}
