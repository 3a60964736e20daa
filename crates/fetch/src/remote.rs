//! Remote source interfaces.

use async_trait::async_trait;
use fetchcast_primitives::{Record, RecordId, SourceId};
use futures::stream::BoxStream;

use crate::Result;

/// Records answered by one source for one request.
///
/// The stream is finite: it ends when the source signals end-of-results or
/// when the transport gives up. Records are only produced while the caller
/// polls, so nothing is emitted before the coordinator is listening.
pub type RecordStream = BoxStream<'static, Record>;

/// Issues id-filtered requests against one remote source at a time.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
	/// Opens a request for `ids` on `source`.
	async fn fetch(&self, source: &SourceId, ids: Vec<RecordId>) -> Result<RecordStream>;
}

/// One source's response to a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
	pub source: SourceId,
	/// `true` when the source accepted the record.
	pub ok: bool,
	/// Human readable reason supplied by the source, if any.
	pub message: Option<String>,
}

/// Acknowledgements produced by one publish attempt.
pub type AckStream = BoxStream<'static, PublishAck>;

/// Sends locally created records to remote sources.
#[async_trait]
pub trait RemotePublisher: Send + Sync + 'static {
	/// Sends `record` to `source`.
	async fn send(&self, source: &SourceId, record: &Record) -> Result<AckStream>;
}
