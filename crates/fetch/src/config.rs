//! Coordinator configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! debounce_ms = 500
//! max_wait_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// The file is not valid TOML or has unknown keys.
	#[error("config parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// Values parsed but are inconsistent.
	#[error("invalid config: {0}")]
	Invalid(String),
}

/// Tunables for [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
	/// Trailing-edge debounce window in milliseconds. Every request that adds
	/// a pending id pushes the drain back by this much.
	pub debounce_ms: u64,
	/// Upper bound in milliseconds between the first pending request of a
	/// cycle and its drain. `0` disables the bound.
	pub max_wait_ms: u64,
}

impl FetchConfig {
	/// Default debounce window.
	pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
	/// Default accumulation bound.
	pub const DEFAULT_MAX_WAIT_MS: u64 = 2_000;

	/// Parses and validates TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses, and validates a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&text)
	}

	/// Checks cross-field constraints.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_wait_ms != 0 && self.max_wait_ms < self.debounce_ms {
			return Err(ConfigError::Invalid(format!(
				"max_wait_ms ({}) must be 0 or at least debounce_ms ({})",
				self.max_wait_ms, self.debounce_ms
			)));
		}
		Ok(())
	}

	/// Sets the debounce window.
	#[must_use]
	pub fn with_debounce(mut self, window: Duration) -> Self {
		self.debounce_ms = millis(window);
		self
	}

	/// Sets or clears the accumulation bound.
	#[must_use]
	pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
		self.max_wait_ms = max_wait.map_or(0, millis);
		self
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn max_wait(&self) -> Option<Duration> {
		(self.max_wait_ms != 0).then(|| Duration::from_millis(self.max_wait_ms))
	}
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
	u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for FetchConfig {
	fn default() -> Self {
		Self {
			debounce_ms: Self::DEFAULT_DEBOUNCE_MS,
			max_wait_ms: Self::DEFAULT_MAX_WAIT_MS,
		}
	}
}
