//! Local persistent cache interface and an in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fetchcast_primitives::{Record, RecordId};
use parking_lot::RwLock;

use crate::Result;

/// Key-addressable record store consulted before any remote source.
#[async_trait]
pub trait LocalCache: Send + Sync + 'static {
	/// Returns the held subset of `ids`. Missing ids are omitted; a miss is
	/// never an error.
	async fn query(&self, ids: &[RecordId]) -> Result<Vec<Record>>;

	/// Upserts `record` by id.
	async fn put(&self, record: &Record) -> Result<()>;
}

/// Process-local [`LocalCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
	records: RwLock<HashMap<RecordId, Record>>,
	queries: AtomicU64,
	puts: AtomicU64,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a cache pre-loaded with `records`. Seeding does not count
	/// towards [`puts`](Self::puts).
	pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
		let cache = Self::default();
		cache.records.write().extend(records.into_iter().map(|r| (r.id(), r)));
		cache
	}

	pub fn get(&self, id: &RecordId) -> Option<Record> {
		self.records.read().get(id).cloned()
	}

	pub fn contains(&self, id: &RecordId) -> bool {
		self.records.read().contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.records.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.read().is_empty()
	}

	/// Drops every stored record.
	pub fn wipe(&self) {
		let mut records = self.records.write();
		tracing::debug!(dropped = records.len(), "cache.memory.wipe");
		records.clear();
	}

	/// Number of `query` calls served.
	pub fn queries(&self) -> u64 {
		self.queries.load(Ordering::Relaxed)
	}

	/// Number of `put` calls served.
	pub fn puts(&self) -> u64 {
		self.puts.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl LocalCache for MemoryCache {
	async fn query(&self, ids: &[RecordId]) -> Result<Vec<Record>> {
		self.queries.fetch_add(1, Ordering::Relaxed);
		let records = self.records.read();
		Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
	}

	async fn put(&self, record: &Record) -> Result<()> {
		self.puts.fetch_add(1, Ordering::Relaxed);
		self.records.write().insert(record.id(), record.clone());
		Ok(())
	}
}
