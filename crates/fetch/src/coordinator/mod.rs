//! Batching request coordinator.
//!
//! Callers ask for records by id with a set of candidate sources and get the
//! record's [`Cell`] back immediately. Lookups accumulate in a pending set
//! over a trailing-edge debounce window, then drain in one cycle: the local
//! cache is consulted first and only the ids it does not hold are requested
//! from remote sources, one request per source.
//!
//! # State machine
//!
//! ```text
//! Idle --request--> Accumulating --deadline--> Draining --pending empty--> Idle
//!                        ^                        |
//!                        +-----pending non-empty--+
//! ```
//!
//! A driver task is spawned on the `Idle -> Accumulating` edge and exits on
//! the transition back to `Idle`, so at most one drain runs at a time.
//! Requests that arrive while a drain runs land in the pending set and are
//! served by a follow-up cycle.

use std::collections::{BTreeSet, HashMap};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use fetchcast_cell::{Cell, CellRegistry};
use fetchcast_primitives::{Record, RecordId, SourceId};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cache::LocalCache;
use crate::config::FetchConfig;
use crate::publish::PublishLog;
use crate::remote::RemoteSource;
use crate::scoreboard::Scoreboard;
use crate::task::{self, TaskClass};

mod drain;

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Nothing pending and no drain running.
	Idle,
	/// Pending ids are waiting for the debounce deadline.
	Accumulating,
	/// A drain cycle is resolving a snapshot of the pending set.
	Draining,
}

struct State {
	phase: Phase,
	pending: HashMap<RecordId, BTreeSet<SourceId>>,
	/// Trailing-edge deadline, pushed back by every request.
	deadline: Option<Instant>,
	/// Fixed bound from the first request of the cycle.
	hard_deadline: Option<Instant>,
	/// Set by [`Coordinator::flush`] to skip the remaining window.
	flush: bool,
}

impl State {
	fn arm(&mut self, now: Instant, config: &FetchConfig) {
		self.deadline = Some(after(now, config.debounce()));
		if self.hard_deadline.is_none() {
			self.hard_deadline = config.max_wait().map(|max| after(now, max));
		}
	}

	fn drain_at(&self) -> Option<Instant> {
		match (self.deadline, self.hard_deadline) {
			(Some(soft), Some(hard)) => Some(soft.min(hard)),
			(soft, None) => soft,
			(None, hard) => hard,
		}
	}
}

/// `now + delay`, clamped to roughly thirty years out.
fn after(now: Instant, delay: Duration) -> Instant {
	now.checked_add(delay)
		.unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

pub(crate) struct Inner {
	config: FetchConfig,
	cache: Arc<dyn LocalCache>,
	remote: Arc<dyn RemoteSource>,
	cells: CellRegistry<RecordId, Record>,
	state: Mutex<State>,
	/// Wakes the driver early (flush, shutdown).
	wake: Notify,
	/// Signalled when the coordinator may have become quiescent, and when a
	/// follow-up cycle starts accumulating.
	idle: Notify,
	/// Spawned source requests and publishes still running.
	inflight: AtomicUsize,
	cycles: AtomicU64,
	cancel: CancellationToken,
	scoreboard: Scoreboard,
	publish_log: PublishLog,
}

/// Fetch-once, cache, multicast coordinator for content-addressed records.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Coordinator {
	inner: Arc<Inner>,
}

impl Coordinator {
	/// Creates a coordinator over the given collaborators.
	pub fn new(config: FetchConfig, cache: Arc<dyn LocalCache>, remote: Arc<dyn RemoteSource>) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				cache,
				remote,
				cells: CellRegistry::new(),
				state: Mutex::new(State {
					phase: Phase::Idle,
					pending: HashMap::new(),
					deadline: None,
					hard_deadline: None,
					flush: false,
				}),
				wake: Notify::new(),
				idle: Notify::new(),
				inflight: AtomicUsize::new(0),
				cycles: AtomicU64::new(0),
				cancel: CancellationToken::new(),
				scoreboard: Scoreboard::new(),
				publish_log: PublishLog::new(),
			}),
		}
	}

	/// Returns the cell for `id`, scheduling a lookup if it holds no value.
	///
	/// Never fails. The record, if any source has it, arrives through the
	/// cell. Ids that nobody answers stay empty until requested again.
	pub fn request<I>(&self, id: RecordId, sources: I) -> Cell<Record>
	where
		I: IntoIterator<Item = SourceId>,
	{
		let cell = self.inner.cells.get_or_create(&id);
		if cell.has_value() {
			trace!(id = %id.short(), "fetch.request.known");
			return cell;
		}
		if self.inner.cancel.is_cancelled() {
			debug!(id = %id.short(), "fetch.request.after_shutdown");
			return cell;
		}

		let start_driver = {
			let mut state = self.inner.state.lock();
			state.pending.entry(id).or_default().extend(sources);
			state.arm(Instant::now(), &self.inner.config);
			if state.phase == Phase::Idle {
				state.phase = Phase::Accumulating;
				true
			} else {
				false
			}
		};

		if start_driver {
			let inner = Arc::clone(&self.inner);
			task::spawn(TaskClass::Driver, inner.run_driver());
		}
		cell
	}

	/// [`request`](Self::request) with raw source URLs. Unusable URLs are
	/// dropped.
	pub fn request_urls<I, S>(&self, id: RecordId, urls: I) -> Cell<Record>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.request(id, SourceId::sanitize(urls))
	}

	/// Returns the cell for `id` without scheduling anything.
	pub fn cell(&self, id: &RecordId) -> Option<Cell<Record>> {
		self.inner.cells.get(id)
	}

	/// Delivers a record received outside of a drain (for example from a
	/// live subscription) and optionally persists it.
	pub async fn ingest(&self, record: Record, persist: bool) -> Cell<Record> {
		let id = record.id();
		let stored = self.inner.deliver(record, None);
		if persist {
			self.inner.persist(&stored).await;
		}
		self.inner.cells.get_or_create(&id)
	}

	/// Makes a locally created record visible: writes it to the local cache
	/// and delivers it into its cell. Nothing is sent to remote sources.
	pub async fn publish(&self, record: Record) -> Cell<Record> {
		self.inner.persist(&record).await;
		let id = record.id();
		self.inner.deliver(record, None);
		self.inner.cells.get_or_create(&id)
	}

	/// Drains immediately and waits until no drain is running and no remote
	/// request or publish is in flight.
	pub async fn flush(&self) {
		loop {
			let mut idle = pin!(self.inner.idle.notified());
			idle.as_mut().enable();

			{
				let mut state = self.inner.state.lock();
				if state.phase == Phase::Idle && self.inner.inflight.load(Ordering::Acquire) == 0 {
					return;
				}
				if state.phase == Phase::Accumulating {
					state.flush = true;
					self.inner.wake.notify_one();
				}
			}

			idle.await;
		}
	}

	/// Stops the driver and aborts in-flight remote streams and publishes.
	///
	/// Later [`request`](Self::request) calls still return cells but schedule
	/// nothing.
	pub async fn shutdown(&self) {
		debug!("fetch.shutdown");
		self.inner.cancel.cancel();
		self.inner.wake.notify_one();
		self.flush().await;
	}

	pub fn phase(&self) -> Phase {
		self.inner.state.lock().phase
	}

	/// Number of ids waiting for the next drain.
	pub fn pending_len(&self) -> usize {
		self.inner.state.lock().pending.len()
	}

	/// Number of drain cycles that found pending ids.
	pub fn cycles(&self) -> u64 {
		self.inner.cycles.load(Ordering::Relaxed)
	}

	pub fn config(&self) -> &FetchConfig {
		&self.inner.config
	}

	pub fn scoreboard(&self) -> &Scoreboard {
		&self.inner.scoreboard
	}

	pub fn publish_log(&self) -> &PublishLog {
		&self.inner.publish_log
	}

	pub(crate) fn inner(&self) -> &Arc<Inner> {
		&self.inner
	}
}

impl std::fmt::Debug for Coordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("Coordinator")
			.field("phase", &state.phase)
			.field("pending", &state.pending.len())
			.field("cells", &self.inner.cells.len())
			.field("inflight", &self.inner.inflight.load(Ordering::Relaxed))
			.finish()
	}
}

impl Inner {
	/// Runs the state machine from `Accumulating` until it returns to `Idle`.
	async fn run_driver(self: Arc<Self>) {
		loop {
			if !self.wait_for_deadline().await {
				self.finish_cycle();
				return;
			}

			let batch = {
				let mut state = self.state.lock();
				state.phase = Phase::Draining;
				state.flush = false;
				state.deadline = None;
				state.hard_deadline = None;
				std::mem::take(&mut state.pending)
			};

			if batch.is_empty() {
				trace!("fetch.drain.skip_empty");
			} else {
				self.drain(batch).await;
			}

			if !self.finish_cycle() {
				return;
			}
			trace!("fetch.drain.follow_up");
		}
	}

	/// Sleeps until the drain deadline or a flush. Returns `false` on
	/// shutdown.
	async fn wait_for_deadline(&self) -> bool {
		loop {
			if self.cancel.is_cancelled() {
				return false;
			}
			let drain_at = {
				let state = self.state.lock();
				if state.flush {
					return true;
				}
				state.drain_at()
			};
			let Some(drain_at) = drain_at else {
				return true;
			};
			if Instant::now() >= drain_at {
				return true;
			}

			tokio::select! {
				_ = tokio::time::sleep_until(drain_at) => {}
				_ = self.wake.notified() => {}
				_ = self.cancel.cancelled() => return false,
			}
		}
	}

	/// Leaves `Draining` (or an aborted `Accumulating`) under a single lock
	/// acquisition: back to `Accumulating` when ids arrived meanwhile,
	/// otherwise to `Idle`. Returns `true` when a follow-up cycle starts.
	///
	/// A request observing any phase other than `Idle` relies on this driver
	/// to pick its id up, so the emptiness check and the move to `Idle` must
	/// not be separated.
	fn finish_cycle(&self) -> bool {
		let follow_up = {
			let mut state = self.state.lock();
			state.flush = false;
			if self.cancel.is_cancelled() {
				state.pending.clear();
				state.deadline = None;
				state.hard_deadline = None;
			}
			if state.pending.is_empty() {
				state.phase = Phase::Idle;
				false
			} else {
				state.phase = Phase::Accumulating;
				true
			}
		};
		// Flush waiters either return or, on a follow-up, cut its window short.
		self.idle.notify_waiters();
		follow_up
	}

	/// Stores `record` in its cell, merging the confirming sources of the
	/// value already there. Returns the stored value.
	pub(crate) fn deliver(&self, record: Record, from: Option<&SourceId>) -> Record {
		let cell = self.cells.get_or_create(&record.id());
		cell.update(|current| {
			let mut next = record;
			if let Some(source) = from {
				next = next.with_seen_on(source.clone());
			}
			if let Some(current) = current {
				next = next.merge_seen_on(current.seen_on());
			}
			next
		})
	}

	/// Writes `record` to the local cache. Failures are logged and reported
	/// as `false`.
	pub(crate) async fn persist(&self, record: &Record) -> bool {
		match self.cache.put(record).await {
			Ok(()) => true,
			Err(error) => {
				tracing::warn!(id = %record.id().short(), %error, "fetch.cache.put_failed");
				false
			}
		}
	}

	pub(crate) fn cells(&self) -> &CellRegistry<RecordId, Record> {
		&self.cells
	}

	pub(crate) fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Counts a spawned task as in flight until the returned guard drops.
	pub(crate) fn track(self: &Arc<Self>) -> InflightGuard {
		self.inflight.fetch_add(1, Ordering::AcqRel);
		InflightGuard {
			inner: Arc::clone(self),
		}
	}
}

/// Keeps [`Coordinator::flush`] waiting while a spawned task runs.
pub(crate) struct InflightGuard {
	inner: Arc<Inner>,
}

impl Drop for InflightGuard {
	fn drop(&mut self) {
		if self.inner.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.inner.idle.notify_waiters();
		}
	}
}

#[cfg(test)]
mod tests;
