//! Fetchcast demo binary.
//!
//! Runs one batched fetch session against simulated sources:
//! - seeds a memory cache with a few records
//! - requests every record from every source
//! - publishes one new record and reports per-source acknowledgements

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use fetchcast_fetch::{
	AckStream, Coordinator, FetchConfig, MemoryCache, PublishAck, Record, RecordId, RecordStream, RemotePublisher, RemoteSource, Result,
	SourceId,
};
use futures::StreamExt;
use futures::stream;
use tracing::info;

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "fetchcast-demo")]
#[command(about = "Batch record lookups across simulated sources")]
struct Args {
	/// TOML file with `debounce_ms` and `max_wait_ms`
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Source URL (ws or wss), repeatable
	#[arg(short, long = "source", value_name = "URL")]
	sources: Vec<String>,

	/// Number of records to request
	#[arg(short, long, default_value_t = 8)]
	records: u8,

	/// How many of those records the local cache already holds
	#[arg(long, default_value_t = 2)]
	cached: u8,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

const DEFAULT_SOURCES: [&str; 3] = ["wss://alpha.example", "wss://beta.example", "wss://gamma.example"];

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => FetchConfig::load(path)?,
		None => FetchConfig::default(),
	};
	let sources: Vec<SourceId> = if args.sources.is_empty() {
		SourceId::sanitize(DEFAULT_SOURCES).into_iter().collect()
	} else {
		SourceId::sanitize(&args.sources).into_iter().collect()
	};
	if sources.is_empty() {
		return Err("no usable source urls".into());
	}
	info!(debounce_ms = config.debounce_ms, max_wait_ms = config.max_wait_ms, sources = sources.len(), "starting fetchcast-demo");

	let all: Vec<Record> = (0..args.records).map(sample_record).collect();
	let cache = Arc::new(MemoryCache::with_records(all.iter().take(args.cached as usize).cloned()));
	let network = Arc::new(SimulatedNetwork::new(&sources, &all));
	let coordinator = Coordinator::new(config, cache.clone(), network.clone());

	let mut subscriptions = Vec::with_capacity(all.len());
	for record in &all {
		let cell = coordinator.request(record.id(), sources.iter().cloned());
		subscriptions.push(cell.subscribe(|r: &Record| {
			info!(id = %r.id().short(), seen_on = r.seen_on().len(), "record updated");
		}));
	}
	coordinator.flush().await;

	println!("records:");
	for record in &all {
		match coordinator.cell(&record.id()).and_then(|cell| cell.get()) {
			Some(found) => {
				let seen: Vec<&str> = found.seen_on().iter().map(SourceId::as_str).collect();
				let origin = if seen.is_empty() { "cache".to_string() } else { seen.join(", ") };
				println!("  {}  {}", found.id().short(), origin);
			}
			None => println!("  {}  not found", record.id().short()),
		}
	}

	println!("sources:");
	for score in coordinator.scoreboard().snapshots() {
		println!(
			"  {}  requests={} records={} empty={} failures={} first_record={:?}",
			score.source,
			score.requests,
			score.records,
			score.empty_responses,
			score.failures,
			score.average_first_record()
		);
	}

	let note = sample_record(args.records);
	let entry = coordinator
		.publish_to("Note", note, sources.iter().cloned(), network)
		.await;
	let status = entry.wait_done().await;
	println!(
		"published {}: {} accepted, {} rejected",
		entry.record_id().short(),
		status.accepted().count(),
		status.rejected().count()
	);

	drop(subscriptions);
	coordinator.shutdown().await;
	info!(cycles = coordinator.cycles(), cached = cache.len(), "done");
	Ok(())
}

fn sample_record(index: u8) -> Record {
	let mut bytes = [0u8; 32];
	bytes[0] = 0xfc;
	bytes[31] = index;
	Record::new(RecordId::from_bytes(bytes), format!("record #{index}").into_bytes())
}

/// In-process stand-in for a set of remote sources.
///
/// Source `n` is `n + 1` latency steps away and misses every record whose
/// index is congruent to `n` modulo 3.
struct SimulatedNetwork {
	sources: HashMap<SourceId, (Duration, HashMap<RecordId, Record>)>,
}

impl SimulatedNetwork {
	const STEP: Duration = Duration::from_millis(40);

	fn new(sources: &[SourceId], records: &[Record]) -> Self {
		let sources = sources
			.iter()
			.enumerate()
			.map(|(n, source)| {
				let held = records
					.iter()
					.enumerate()
					.filter(|(index, _)| index % 3 != n % 3)
					.map(|(_, record)| (record.id(), record.clone()))
					.collect();
				(source.clone(), (Self::STEP * (n as u32 + 1), held))
			})
			.collect();
		Self { sources }
	}
}

#[async_trait]
impl RemoteSource for SimulatedNetwork {
	async fn fetch(&self, source: &SourceId, ids: Vec<RecordId>) -> Result<RecordStream> {
		let Some((latency, held)) = self.sources.get(source) else {
			return Ok(stream::empty().boxed());
		};
		let latency = *latency;
		let found: Vec<Record> = ids.iter().filter_map(|id| held.get(id).cloned()).collect();
		Ok(stream::iter(found)
			.then(move |record| async move {
				tokio::time::sleep(latency).await;
				record
			})
			.boxed())
	}
}

#[async_trait]
impl RemotePublisher for SimulatedNetwork {
	async fn send(&self, source: &SourceId, _record: &Record) -> Result<AckStream> {
		let ack = PublishAck {
			source: source.clone(),
			ok: self.sources.contains_key(source),
			message: None,
		};
		Ok(stream::once(async move { ack }).boxed())
	}
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("FETCHCAST_LOG")
		.or_else(|_| EnvFilter::try_from_default_env())
		.unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("fetchcast_demo=trace,fetchcast_fetch=trace,debug")
			} else {
				EnvFilter::new("fetchcast_demo=info,fetchcast_fetch=debug,warn")
			}
		});

	tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
