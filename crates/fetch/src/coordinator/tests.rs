use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::sleep;

use super::*;
use crate::cache::MemoryCache;
use crate::testing::{FailingCache, MockRemote, SlowCache, coordinator, id, record, source, wide_id};

const MS: Duration = Duration::from_millis(1);

#[tokio::test(start_paused = true)]
async fn known_record_short_circuits() {
	let cache = Arc::new(MemoryCache::new());
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(cache.clone(), remote.clone());

	coord.ingest(record(1), false).await;
	let cell = coord.request(id(1), [source("one")]);

	assert_eq!(cell.get(), Some(record(1)));
	assert_eq!(coord.phase(), Phase::Idle);
	assert_eq!(coord.pending_len(), 0);

	coord.flush().await;
	assert_eq!(cache.queries(), 0);
	assert_eq!(cache.puts(), 0);
	assert!(remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn requests_in_one_window_share_a_cell_and_a_source_request() {
	let s1 = source("one");
	let s2 = source("two");
	let cache = Arc::new(MemoryCache::new());
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(cache.clone(), remote.clone());

	let first = coord.request(id(1), [s1.clone()]);
	let second = coord.request(id(1), [s1.clone()]);
	coord.request(id(2), [s1.clone(), s2.clone()]);

	assert!(Cell::ptr_eq(&first, &second));
	assert_eq!(coord.phase(), Phase::Accumulating);
	assert_eq!(coord.pending_len(), 2);

	coord.flush().await;
	assert_eq!(remote.calls(), vec![(s1, vec![id(1), id(2)]), (s2, vec![id(2)])]);
	assert_eq!(cache.queries(), 1);
	assert_eq!(coord.cycles(), 1);
	assert_eq!(coord.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn cache_hits_skip_the_network_and_are_not_rewritten() {
	let cache = Arc::new(MemoryCache::with_records([record(3)]));
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(cache.clone(), remote.clone());

	let cell = coord.request(id(3), [source("one")]);
	coord.flush().await;

	assert_eq!(cell.get(), Some(record(3)));
	assert!(remote.calls().is_empty());
	assert_eq!(cache.queries(), 1);
	assert_eq!(cache.puts(), 0);
}

#[tokio::test(start_paused = true)]
async fn fastest_source_wins_and_later_sources_extend_seen_on() {
	let s1 = source("one");
	let s2 = source("two");
	let cache = Arc::new(MemoryCache::new());
	let remote = Arc::new(
		MockRemote::new()
			.answer(&s1, 100 * MS, [record(1), record(2)])
			.answer(&s2, 10 * MS, [record(2)]),
	);
	let coord = coordinator(cache.clone(), remote.clone());

	let a = coord.request(id(1), [s1.clone()]);
	let b = coord.request(id(2), [s1.clone()]);
	coord.request(id(2), [s2.clone()]);

	sleep(520 * MS).await;
	assert_eq!(a.get(), None);
	let early = b.get().unwrap();
	assert_eq!(early.seen_on(), &BTreeSet::from([s2.clone()]));

	coord.flush().await;
	assert_eq!(a.get().unwrap().seen_on(), &BTreeSet::from([s1.clone()]));
	assert_eq!(b.get().unwrap().seen_on(), &BTreeSet::from([s1.clone(), s2.clone()]));
	assert_eq!(remote.calls(), vec![(s1, vec![id(1), id(2)]), (s2.clone(), vec![id(2)])]);

	// Each id is written once per cycle, by whichever source answered first.
	assert_eq!(cache.puts(), 2);
	assert_eq!(cache.get(&id(2)).unwrap().seen_on(), &BTreeSet::from([s2]));
}

#[tokio::test(start_paused = true)]
async fn debounce_is_trailing_edge() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(Arc::new(MemoryCache::new()), remote.clone());

	coord.request(id(1), [s1.clone()]);
	sleep(300 * MS).await;
	coord.request(id(2), [s1.clone()]);
	sleep(300 * MS).await;

	assert!(remote.calls().is_empty());
	assert_eq!(coord.phase(), Phase::Accumulating);

	sleep(250 * MS).await;
	assert_eq!(remote.calls(), vec![(s1, vec![id(1), id(2)])]);
	assert_eq!(coord.cycles(), 1);
}

#[tokio::test(start_paused = true)]
async fn max_wait_bounds_a_continuous_request_stream() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new());
	let config = FetchConfig::default()
		.with_debounce(500 * MS)
		.with_max_wait(Some(1000 * MS));
	let coord = Coordinator::new(config, Arc::new(MemoryCache::new()), remote.clone());

	for n in 1..=4 {
		coord.request(id(n), [s1.clone()]);
		sleep(300 * MS).await;
	}

	assert_eq!(remote.calls(), vec![(s1, vec![id(1), id(2), id(3), id(4)])]);
}

#[tokio::test(start_paused = true)]
async fn requests_during_a_drain_get_a_follow_up_cycle() {
	let s1 = source("one");
	let cache = Arc::new(SlowCache {
		inner: MemoryCache::new(),
		delay: 100 * MS,
	});
	let remote = Arc::new(MockRemote::new().answer(&s1, MS, [record(1), record(2)]));
	let coord = coordinator(cache.clone(), remote.clone());

	let first = coord.request(id(1), [s1.clone()]);
	sleep(550 * MS).await;
	assert_eq!(coord.phase(), Phase::Draining);

	let second = coord.request(id(2), [s1.clone()]);
	assert_eq!(coord.pending_len(), 1);

	coord.flush().await;
	assert_eq!(first.get(), Some(record(1).with_seen_on(s1.clone())));
	assert_eq!(second.get(), Some(record(2).with_seen_on(s1.clone())));
	assert_eq!(remote.calls(), vec![(s1.clone(), vec![id(1)]), (s1, vec![id(2)])]);
	assert_eq!(cache.inner.queries(), 2);
	assert_eq!(coord.cycles(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_source_leaves_cell_empty_until_requested_again() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new().fail(&s1));
	let coord = coordinator(Arc::new(MemoryCache::new()), remote.clone());

	let cell = coord.request(id(1), [s1.clone()]);
	coord.flush().await;
	sleep(Duration::from_secs(5)).await;

	assert_eq!(cell.get(), None);
	assert_eq!(remote.calls().len(), 1);
	let score = coord.scoreboard().get(&s1).unwrap();
	assert_eq!(score.requests, 1);
	assert_eq!(score.failures, 1);

	coord.request(id(1), [s1.clone()]);
	coord.flush().await;
	assert_eq!(remote.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn silent_source_counts_as_empty_response() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(Arc::new(MemoryCache::new()), remote.clone());

	let cell = coord.request(id(7), [s1.clone()]);
	coord.flush().await;

	assert_eq!(cell.get(), None);
	assert!(!cell.has_value());
	assert_eq!(coord.scoreboard().get(&s1).unwrap().empty_responses, 1);
}

#[tokio::test(start_paused = true)]
async fn flush_when_idle_does_nothing() {
	let cache = Arc::new(MemoryCache::new());
	let coord = coordinator(cache.clone(), Arc::new(MockRemote::new()));

	coord.flush().await;
	assert_eq!(cache.queries(), 0);
	assert_eq!(coord.cycles(), 0);
	assert_eq!(coord.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn unusable_source_urls_are_dropped() {
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(Arc::new(MemoryCache::new()), remote.clone());

	coord.request_urls(id(1), ["https://web.example", "not a url", "wss://one.example"]);
	coord.flush().await;

	assert_eq!(remote.calls(), vec![(source("one"), vec![id(1)])]);
}

#[tokio::test(start_paused = true)]
async fn unrequested_records_from_a_source_are_ignored() {
	let s1 = source("one");
	let cache = Arc::new(MemoryCache::new());
	let remote = Arc::new(MockRemote::new().answer(&s1, MS, [record(9), record(1)]));
	let coord = coordinator(cache.clone(), remote.clone());

	let cell = coord.request(id(1), [s1.clone()]);
	coord.flush().await;

	assert!(cell.has_value());
	assert!(coord.cell(&id(9)).is_none());
	assert!(!cache.contains(&id(9)));
	assert_eq!(coord.scoreboard().get(&s1).unwrap().records, 1);
}

#[tokio::test(start_paused = true)]
async fn ingest_persists_only_when_asked() {
	let cache = Arc::new(MemoryCache::new());
	let coord = coordinator(cache.clone(), Arc::new(MockRemote::new()));

	coord.ingest(record(1), false).await;
	coord.ingest(record(2), true).await;

	assert!(coord.cell(&id(1)).unwrap().has_value());
	assert!(!cache.contains(&id(1)));
	assert!(cache.contains(&id(2)));
}

#[tokio::test(start_paused = true)]
async fn later_payload_replaces_earlier_one() {
	let coord = coordinator(Arc::new(MemoryCache::new()), Arc::new(MockRemote::new()));

	coord.ingest(Record::new(id(1), &b"first"[..]), false).await;
	let cell = coord.ingest(Record::new(id(1), &b"second"[..]), false).await;

	assert_eq!(cell.get().unwrap().payload().as_ref(), b"second");
}

#[tokio::test(start_paused = true)]
async fn published_record_is_cached_and_never_fetched() {
	let cache = Arc::new(MemoryCache::new());
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(cache.clone(), remote.clone());

	let published = coord.publish(record(5)).await;
	let requested = coord.request(id(5), [source("one")]);

	assert!(Cell::ptr_eq(&published, &requested));
	assert_eq!(requested.get(), Some(record(5)));
	assert!(cache.contains(&id(5)));
	coord.flush().await;
	assert!(remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_receives_the_fetched_record() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new().answer(&s1, MS, [record(4)]));
	let coord = coordinator(Arc::new(MemoryCache::new()), remote);

	coord.request(id(4), [s1.clone()]);
	coord.flush().await;

	let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let _sub = coord.cell(&id(4)).unwrap().subscribe(move |r: &Record| sink.lock().push(r.id()));
	assert_eq!(*seen.lock(), vec![id(4)]);
}

#[tokio::test(start_paused = true)]
async fn waiting_on_a_cell_resolves_after_the_drain() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new().answer(&s1, 20 * MS, [record(6)]));
	let coord = coordinator(Arc::new(MemoryCache::new()), remote);

	let record = coord.request(id(6), [s1.clone()]).wait().await;
	assert_eq!(record.id(), id(6));
	assert!(record.is_seen_on(&s1));
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_pending_and_stops_scheduling() {
	let s1 = source("one");
	let cache = Arc::new(MemoryCache::new());
	let remote = Arc::new(MockRemote::new());
	let coord = coordinator(cache.clone(), remote.clone());

	coord.request(id(1), [s1.clone()]);
	coord.shutdown().await;

	assert_eq!(coord.phase(), Phase::Idle);
	assert_eq!(coord.pending_len(), 0);

	let cell = coord.request(id(2), [s1]);
	sleep(Duration::from_secs(3)).await;
	assert!(!cell.has_value());
	assert!(remote.calls().is_empty());
	assert_eq!(cache.queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_a_slow_source_stream() {
	let s1 = source("one");
	let remote = Arc::new(MockRemote::new().answer(&s1, Duration::from_secs(60), [record(1)]));
	let coord = coordinator(Arc::new(MemoryCache::new()), remote.clone());

	let cell = coord.request(id(1), [s1]);
	sleep(600 * MS).await;
	assert_eq!(remote.calls().len(), 1);

	coord.shutdown().await;
	assert!(!cell.has_value());
}

#[tokio::test(start_paused = true)]
async fn failed_cache_write_is_retried_by_the_next_arrival() {
	let s1 = source("one");
	let s2 = source("two");
	let cache = Arc::new(FailingCache::default().fail_puts(1));
	let remote = Arc::new(
		MockRemote::new()
			.answer(&s1, 10 * MS, [record(1)])
			.answer(&s2, 20 * MS, [record(1)]),
	);
	let coord = coordinator(cache.clone(), remote);

	let cell = coord.request(id(1), [s1.clone(), s2.clone()]);
	coord.flush().await;

	let both = BTreeSet::from([s1, s2]);
	assert_eq!(cell.get().unwrap().seen_on(), &both);
	assert_eq!(cache.put_attempts(), 2);
	assert_eq!(cache.inner.get(&id(1)).unwrap().seen_on(), &both);
}

#[tokio::test(start_paused = true)]
async fn failing_cache_query_falls_through_to_sources() {
	let s1 = source("one");
	let cache = Arc::new(FailingCache::with_records([record(1)]).fail_queries());
	let remote = Arc::new(MockRemote::new().answer(&s1, MS, [record(1)]));
	let coord = coordinator(cache.clone(), remote.clone());

	let cell = coord.request(id(1), [s1.clone()]);
	coord.flush().await;

	assert_eq!(remote.calls(), vec![(s1.clone(), vec![id(1)])]);
	assert!(cell.get().unwrap().is_seen_on(&s1));
}

#[tokio::test(start_paused = true)]
async fn failing_cache_write_still_delivers() {
	let s1 = source("one");
	let cache = Arc::new(FailingCache::default().fail_puts(10));
	let remote = Arc::new(MockRemote::new().answer(&s1, MS, [record(1)]));
	let coord = coordinator(cache.clone(), remote.clone());

	let cell = coord.request(id(1), [s1.clone()]);
	coord.flush().await;
	assert!(cell.has_value());
	assert!(cache.inner.is_empty());

	// The cell is the source of truth from here on.
	coord.request(id(1), [s1]);
	coord.flush().await;
	assert_eq!(remote.calls().len(), 1);

	let ingested = coord.ingest(record(2), true).await;
	assert!(ingested.has_value());
	assert_eq!(cache.put_attempts(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ids_requested_while_a_drain_finishes_are_never_stranded() {
	let s1 = source("one");
	let config = FetchConfig::default().with_debounce(Duration::ZERO).with_max_wait(None);
	let coord = Coordinator::new(config, Arc::new(MemoryCache::new()), Arc::new(MockRemote::new()));

	for round in 0..100u32 {
		let writer = coord.clone();
		let source = s1.clone();
		tokio::task::spawn_blocking(move || {
			for n in 0..200 {
				writer.request(wide_id(round * 200 + n), [source.clone()]);
			}
		})
		.await
		.unwrap();

		coord.flush().await;
		assert_eq!(coord.phase(), Phase::Idle, "round {round}");
		assert_eq!(coord.pending_len(), 0, "round {round}");
	}
}
