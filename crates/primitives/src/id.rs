use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Length of a record id digest in bytes.
pub const ID_LEN: usize = 32;

/// Errors produced when parsing a [`RecordId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
	/// Input was not exactly `2 * ID_LEN` bytes long.
	#[error("record id must be {expected} hex characters, got {got} bytes")]
	Length {
		/// Required length in bytes.
		expected: usize,
		/// Byte length of the input.
		got: usize,
	},
	/// Input contained a character outside `[0-9a-fA-F]`.
	#[error("invalid hex character {ch:?} at offset {offset}")]
	InvalidChar {
		/// The offending character.
		ch: char,
		/// Byte offset of the character in the input.
		offset: usize,
	},
}

/// Content hash identifying one record.
///
/// The id is assumed to be a cryptographic digest of the record, so two
/// records with the same id carry the same payload. Rendered as 64 lowercase
/// hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; ID_LEN]);

impl RecordId {
	/// Wraps a raw digest.
	pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
		Self(bytes)
	}

	/// Returns the raw digest.
	pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
		&self.0
	}

	/// Parses a hex-encoded id. Uppercase digits are accepted.
	pub fn parse(s: &str) -> Result<Self, IdError> {
		if s.len() != ID_LEN * 2 {
			return Err(IdError::Length {
				expected: ID_LEN * 2,
				got: s.len(),
			});
		}

		let mut out = [0u8; ID_LEN];
		let bytes = s.as_bytes();
		for (i, slot) in out.iter_mut().enumerate() {
			let hi = hex_value(s, bytes[2 * i], 2 * i)?;
			let lo = hex_value(s, bytes[2 * i + 1], 2 * i + 1)?;
			*slot = (hi << 4) | lo;
		}
		Ok(Self(out))
	}

	/// Returns an abbreviated form (first 8 hex characters) for log fields.
	pub fn short(&self) -> String {
		let mut s = String::with_capacity(8);
		for byte in &self.0[..4] {
			s.push_str(&format!("{byte:02x}"));
		}
		s
	}
}

/// Decodes the hex digit at `offset`. The first non-hex byte met while
/// scanning forward always starts a character, so the error can report it
/// whole.
fn hex_value(s: &str, byte: u8, offset: usize) -> Result<u8, IdError> {
	match byte {
		b'0'..=b'9' => Ok(byte - b'0'),
		b'a'..=b'f' => Ok(byte - b'a' + 10),
		b'A'..=b'F' => Ok(byte - b'A' + 10),
		_ => {
			let ch = s.get(offset..).and_then(|rest| rest.chars().next()).unwrap_or(char::REPLACEMENT_CHARACTER);
			Err(IdError::InvalidChar { ch, offset })
		}
	}
}

impl FromStr for RecordId {
	type Err = IdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for byte in &self.0 {
			write!(f, "{byte:02x}")?;
		}
		Ok(())
	}
}

impl fmt::Debug for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "RecordId({})", self.short())
	}
}
