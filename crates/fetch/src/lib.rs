//! Fetch-once, cache, multicast coordination for content-addressed records.
//!
//! [`Coordinator::request`] returns a record's [`Cell`] immediately and
//! batches the lookup with others made in the same debounce window. Each
//! batch is resolved against the [`LocalCache`] first; only the ids it does
//! not hold are requested from [`RemoteSource`]s, with one request per
//! source. Records delivered by remote sources are written back to the cache.
//!
//! The cache and the remote transport are injected, so the coordinator can
//! be driven by in-memory doubles in tests.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod publish;
pub mod remote;
pub mod scoreboard;
mod task;

pub use cache::{LocalCache, MemoryCache};
pub use config::{ConfigError, FetchConfig};
pub use coordinator::{Coordinator, Phase};
pub use error::{Error, Result};
pub use fetchcast_cell::{Cell, CellReceiver, Subscription};
pub use fetchcast_primitives::{Record, RecordId, SourceHint, SourceId};
pub use publish::{PublishEntry, PublishLog, PublishStatus};
pub use remote::{AckStream, PublishAck, RecordStream, RemotePublisher, RemoteSource};
pub use scoreboard::{Scoreboard, SourceScore};

#[cfg(test)]
pub(crate) mod testing;
