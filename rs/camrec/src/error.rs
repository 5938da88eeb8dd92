use crate::{MediaKind, TimestampOverflow};

/// A list of possible errors that can end a session.
///
/// Each variant is either permanent (retrying without a configuration change cannot succeed)
/// or transient (a fresh attempt may succeed). See [Error::is_permanent].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The endpoint address could not be parsed or uses an unsupported scheme.
	#[error("invalid endpoint address: {0}")]
	Address(String),

	#[error("connection failed: {0}")]
	Connection(String),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("{0} track not found")]
	TrackNotFound(MediaKind),

	/// More than one candidate track of the same kind, with [crate::TrackPolicy::Unique].
	#[error("multiple {0} tracks found")]
	AmbiguousTrack(MediaKind),

	#[error("decode error: {0}")]
	Decode(#[from] DecodeError),

	#[error("write error: {0}")]
	Write(#[from] std::io::Error),

	// The container can't renegotiate codec parameters mid-stream.
	#[error("format changed mid-stream: {0}")]
	FormatChange(String),

	/// The transport ended the stream.
	#[error("connection closed")]
	Closed,

	#[error("cancelled")]
	Cancelled,
}

impl Error {
	/// Returns true if retrying with the same configuration cannot succeed.
	pub fn is_permanent(&self) -> bool {
		match self {
			Self::Address(_) | Self::TrackNotFound(_) | Self::AmbiguousTrack(_) => true,
			Self::Connection(_)
			| Self::Protocol(_)
			| Self::Decode(_)
			| Self::Write(_)
			| Self::FormatChange(_)
			| Self::Closed
			| Self::Cancelled => false,
		}
	}

	/// Returns true if the error should tear down the current session.
	///
	/// Decode errors only affect a single access unit.
	pub fn is_fatal(&self) -> bool {
		!matches!(self, Self::Decode(_))
	}
}

/// An error while turning payload units into access units.
///
/// The in-progress access unit is discarded; decoding resumes with the next payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
	#[error("empty payload")]
	Empty,

	#[error("forbidden zero bit is set")]
	ForbiddenBit,

	#[error("unsupported packetization type {0}")]
	Unsupported(u8),

	#[error("truncated {0}")]
	Truncated(&'static str),

	#[error("sequence gap: expected {expected}, got {actual}")]
	SequenceGap { expected: u16, actual: u16 },

	#[error("{0} packets lost mid-unit")]
	Lost(u16),

	#[error("{0} too large")]
	TooLarge(&'static str),

	#[error("malformed AU header: {0}")]
	AuHeader(&'static str),

	#[error("invalid codec config: {0}")]
	Config(&'static str),

	#[error("timestamp overflow")]
	Timestamp(#[from] TimestampOverflow),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classification() {
		assert!(Error::Address("nope".into()).is_permanent());
		assert!(Error::TrackNotFound(MediaKind::Audio).is_permanent());
		assert!(Error::AmbiguousTrack(MediaKind::Video).is_permanent());

		assert!(!Error::Connection("refused".into()).is_permanent());
		assert!(!Error::Protocol("404".into()).is_permanent());
		assert!(!Error::Decode(DecodeError::Empty).is_permanent());
		assert!(!Error::Write(std::io::Error::other("disk full")).is_permanent());
		assert!(!Error::FormatChange("sps".into()).is_permanent());
		assert!(!Error::Closed.is_permanent());
	}

	#[test]
	fn decode_errors_are_not_fatal() {
		assert!(!Error::Decode(DecodeError::TooLarge("ADTS frame")).is_fatal());
		assert!(Error::FormatChange("pps".into()).is_fatal());
		assert!(Error::Write(std::io::Error::other("disk full")).is_fatal());
	}

	#[test]
	fn track_not_found_names_kind() {
		assert_eq!(Error::TrackNotFound(MediaKind::Audio).to_string(), "audio track not found");
	}
}
