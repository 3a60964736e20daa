use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Kinds of background work the coordinator spawns, recorded on trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TaskClass {
	/// The debounce/drain state machine for one active episode.
	Driver,
	/// One remote request streaming records for a source group.
	SourceRequest,
	/// Fan-out of one published record to its sources.
	Publish,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Driver => "driver",
			Self::SourceRequest => "source_request",
			Self::Publish => "publish",
		}
	}
}

/// Runtime used when a coordinator is driven from a thread that has none,
/// such as a synchronous UI thread. Built on first use.
static FALLBACK: OnceLock<Runtime> = OnceLock::new();

fn fallback() -> &'static Runtime {
	FALLBACK.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.worker_threads(2)
			.thread_name("fetchcast-fallback")
			.enable_time()
			.build()
			.expect("fetchcast fallback runtime must build")
	})
}

/// Spawns coordinator work.
pub(crate) fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(task_class = class.as_str(), "fetch.spawn");
	match Handle::try_current() {
		Ok(handle) => handle.spawn(fut),
		Err(_) => fallback().spawn(fut),
	}
}
