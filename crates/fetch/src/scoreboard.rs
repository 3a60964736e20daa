//! Per-source request statistics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fetchcast_primitives::SourceId;
use parking_lot::RwLock;

/// Snapshot of one source's request history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceScore {
	pub source: SourceId,
	/// Requests issued to the source.
	pub requests: u64,
	/// Requested records the source delivered.
	pub records: u64,
	/// Requests that could not be issued.
	pub failures: u64,
	/// Requests that completed without a single requested record.
	pub empty_responses: u64,
	/// Time from issuing a request to its first record, most recent sample.
	pub last_first_record: Option<Duration>,
	first_record_total: Duration,
	first_record_samples: u32,
}

impl SourceScore {
	fn new(source: SourceId) -> Self {
		Self {
			source,
			requests: 0,
			records: 0,
			failures: 0,
			empty_responses: 0,
			last_first_record: None,
			first_record_total: Duration::ZERO,
			first_record_samples: 0,
		}
	}

	/// Mean time to first record across every answered request.
	pub fn average_first_record(&self) -> Option<Duration> {
		(self.first_record_samples > 0).then(|| self.first_record_total / self.first_record_samples)
	}
}

/// Shared scoreboard updated by the coordinator as requests progress.
#[derive(Debug, Default, Clone)]
pub struct Scoreboard {
	inner: Arc<RwLock<HashMap<SourceId, SourceScore>>>,
}

impl Scoreboard {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_entry(&self, source: &SourceId, f: impl FnOnce(&mut SourceScore)) {
		let mut guard = self.inner.write();
		let entry = guard.entry(source.clone()).or_insert_with(|| SourceScore::new(source.clone()));
		f(entry);
	}

	pub(crate) fn record_request(&self, source: &SourceId) {
		self.with_entry(source, |s| s.requests += 1);
	}

	pub(crate) fn record_failure(&self, source: &SourceId) {
		self.with_entry(source, |s| s.failures += 1);
	}

	pub(crate) fn record_first_record(&self, source: &SourceId, elapsed: Duration) {
		self.with_entry(source, |s| {
			s.last_first_record = Some(elapsed);
			s.first_record_total = s.first_record_total.saturating_add(elapsed);
			s.first_record_samples = s.first_record_samples.saturating_add(1);
		});
	}

	pub(crate) fn record_complete(&self, source: &SourceId, received: u64) {
		self.with_entry(source, |s| {
			s.records += received;
			if received == 0 {
				s.empty_responses += 1;
			}
		});
	}

	/// Returns the score for one source, if it was ever contacted.
	pub fn get(&self, source: &SourceId) -> Option<SourceScore> {
		self.inner.read().get(source).cloned()
	}

	/// Returns snapshots sorted by source.
	pub fn snapshots(&self) -> Vec<SourceScore> {
		let mut scores: Vec<_> = self.inner.read().values().cloned().collect();
		scores.sort_by(|a, b| a.source.cmp(&b.source));
		scores
	}
}
