//! Error types for the fetch engine and its collaborators.

use fetchcast_primitives::SourceId;
use thiserror::Error;

use crate::config::ConfigError;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by collaborators.
///
/// None of these reach callers of [`Coordinator::request`]: a failing cache
/// or source is treated as "no record" for the affected ids.
///
/// [`Coordinator::request`]: crate::Coordinator::request
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// The local cache failed to read or write.
	#[error("local cache: {0}")]
	Cache(String),
	/// A remote source request could not be issued.
	#[error("source {url}: {message}")]
	Remote {
		/// Source the request was addressed to.
		url: SourceId,
		/// Transport-specific description.
		message: String,
	},
	/// A publish could not be sent to a source.
	#[error("publish to {url}: {message}")]
	Publish {
		/// Source the record was sent to.
		url: SourceId,
		/// Transport-specific description.
		message: String,
	},
	/// Configuration could not be loaded.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
