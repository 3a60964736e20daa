use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

/// Errors produced when a source URL cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceIdError {
	/// The input is not a URL.
	#[error("invalid source url: {0}")]
	Url(#[from] url::ParseError),
	/// Only websocket sources can answer record requests.
	#[error("unsupported source scheme {0:?} (expected ws or wss)")]
	UnsupportedScheme(String),
	/// The URL has no host component.
	#[error("source url has no host")]
	MissingHost,
}

/// Normalized URL of one remote source.
///
/// Normalization follows the WHATWG URL rules: lowercase host, default port
/// dropped, empty path rendered as `/`. Two spellings of the same relay
/// therefore compare equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Arc<str>);

impl SourceId {
	/// Parses and normalizes a source URL.
	pub fn parse(s: &str) -> Result<Self, SourceIdError> {
		let url = Url::parse(s.trim())?;
		match url.scheme() {
			"ws" | "wss" => {}
			other => return Err(SourceIdError::UnsupportedScheme(other.to_string())),
		}
		if url.host_str().is_none_or(str::is_empty) {
			return Err(SourceIdError::MissingHost);
		}
		Ok(Self(Arc::from(url.as_str())))
	}

	/// Returns the normalized URL.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Parses every URL in `urls`, dropping the ones that are not usable
	/// sources. Duplicate spellings collapse into one entry.
	pub fn sanitize<I, S>(urls: I) -> BTreeSet<SourceId>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		urls.into_iter()
			.filter_map(|raw| match Self::parse(raw.as_ref()) {
				Ok(id) => Some(id),
				Err(error) => {
					tracing::debug!(url = raw.as_ref(), %error, "source.sanitize.dropped");
					None
				}
			})
			.collect()
	}
}

impl FromStr for SourceId {
	type Err = SourceIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for SourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for SourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SourceId({})", self.0)
	}
}
