//! In-memory collaborator doubles shared by the crate's tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fetchcast_primitives::{Record, RecordId, SourceId};
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;

use crate::cache::{LocalCache, MemoryCache};
use crate::remote::{AckStream, PublishAck, RecordStream, RemotePublisher, RemoteSource};
use crate::{Coordinator, Error, FetchConfig, Result};

pub(crate) fn id(n: u8) -> RecordId {
	RecordId::from_bytes([n; 32])
}

pub(crate) fn record(n: u8) -> Record {
	Record::new(id(n), vec![n])
}

/// Ids beyond the 256 that [`id`] covers.
pub(crate) fn wide_id(n: u32) -> RecordId {
	let mut bytes = [0u8; 32];
	bytes[..4].copy_from_slice(&n.to_be_bytes());
	RecordId::from_bytes(bytes)
}

pub(crate) fn source(name: &str) -> SourceId {
	SourceId::parse(&format!("wss://{name}.example")).unwrap()
}

pub(crate) fn coordinator(cache: Arc<dyn LocalCache>, remote: Arc<dyn RemoteSource>) -> Coordinator {
	Coordinator::new(FetchConfig::default(), cache, remote)
}

/// Remote double answering from a fixed per-source table, one record per
/// `delay`. Every `fetch` is recorded.
#[derive(Default)]
pub(crate) struct MockRemote {
	answers: HashMap<SourceId, (Duration, Vec<Record>)>,
	failing: HashSet<SourceId>,
	calls: Mutex<Vec<(SourceId, Vec<RecordId>)>>,
}

impl MockRemote {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn answer(mut self, source: &SourceId, delay: Duration, records: impl IntoIterator<Item = Record>) -> Self {
		self.answers.insert(source.clone(), (delay, records.into_iter().collect()));
		self
	}

	pub(crate) fn fail(mut self, source: &SourceId) -> Self {
		self.failing.insert(source.clone());
		self
	}

	/// Recorded requests, sorted by source.
	pub(crate) fn calls(&self) -> Vec<(SourceId, Vec<RecordId>)> {
		let mut calls = self.calls.lock().clone();
		calls.sort();
		calls
	}
}

#[async_trait]
impl RemoteSource for MockRemote {
	async fn fetch(&self, source: &SourceId, ids: Vec<RecordId>) -> Result<RecordStream> {
		self.calls.lock().push((source.clone(), ids));
		if self.failing.contains(source) {
			return Err(Error::Remote {
				url: source.clone(),
				message: "connection refused".into(),
			});
		}

		let (delay, records) = self.answers.get(source).cloned().unwrap_or_default();
		Ok(stream::iter(records)
			.then(move |record| async move {
				tokio::time::sleep(delay).await;
				record
			})
			.boxed())
	}
}

/// Cache double whose queries take `delay`.
pub(crate) struct SlowCache {
	pub(crate) inner: MemoryCache,
	pub(crate) delay: Duration,
}

#[async_trait]
impl LocalCache for SlowCache {
	async fn query(&self, ids: &[RecordId]) -> Result<Vec<Record>> {
		tokio::time::sleep(self.delay).await;
		self.inner.query(ids).await
	}

	async fn put(&self, record: &Record) -> Result<()> {
		self.inner.put(record).await
	}
}

/// Cache double that can refuse queries and a number of initial puts.
#[derive(Default)]
pub(crate) struct FailingCache {
	pub(crate) inner: MemoryCache,
	fail_queries: AtomicBool,
	failing_puts: AtomicUsize,
	put_attempts: AtomicUsize,
}

impl FailingCache {
	pub(crate) fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
		Self {
			inner: MemoryCache::with_records(records),
			..Self::default()
		}
	}

	pub(crate) fn fail_queries(self) -> Self {
		self.fail_queries.store(true, Ordering::SeqCst);
		self
	}

	pub(crate) fn fail_puts(self, count: usize) -> Self {
		self.failing_puts.store(count, Ordering::SeqCst);
		self
	}

	/// Every `put` call, including refused ones.
	pub(crate) fn put_attempts(&self) -> usize {
		self.put_attempts.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl LocalCache for FailingCache {
	async fn query(&self, ids: &[RecordId]) -> Result<Vec<Record>> {
		if self.fail_queries.load(Ordering::SeqCst) {
			return Err(Error::Cache("database is locked".into()));
		}
		self.inner.query(ids).await
	}

	async fn put(&self, record: &Record) -> Result<()> {
		self.put_attempts.fetch_add(1, Ordering::SeqCst);
		let refused = self
			.failing_puts
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok();
		if refused {
			return Err(Error::Cache("disk full".into()));
		}
		self.inner.put(record).await
	}
}

/// How a [`MockPublisher`] source reacts to a publish.
#[derive(Clone)]
pub(crate) enum PublishReply {
	Accept,
	Reject(&'static str),
	Unreachable,
}

#[derive(Default)]
pub(crate) struct MockPublisher {
	replies: HashMap<SourceId, PublishReply>,
	sent: Mutex<Vec<(SourceId, RecordId)>>,
}

impl MockPublisher {
	pub(crate) fn reply(mut self, source: &SourceId, reply: PublishReply) -> Self {
		self.replies.insert(source.clone(), reply);
		self
	}

	pub(crate) fn sent(&self) -> Vec<(SourceId, RecordId)> {
		let mut sent = self.sent.lock().clone();
		sent.sort();
		sent
	}
}

#[async_trait]
impl RemotePublisher for MockPublisher {
	async fn send(&self, source: &SourceId, record: &Record) -> Result<AckStream> {
		self.sent.lock().push((source.clone(), record.id()));
		let ack = match self.replies.get(source).cloned().unwrap_or(PublishReply::Accept) {
			PublishReply::Accept => PublishAck {
				source: source.clone(),
				ok: true,
				message: None,
			},
			PublishReply::Reject(reason) => PublishAck {
				source: source.clone(),
				ok: false,
				message: Some(reason.to_string()),
			},
			PublishReply::Unreachable => {
				return Err(Error::Publish {
					url: source.clone(),
					message: "unreachable".into(),
				});
			}
		};
		Ok(stream::once(async move { ack }).boxed())
	}
}
