use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::codec::{AacConfig, H264Params};
use crate::depacketize::AacHbr;
use crate::{Error, Result};

/// The expected video encoding, compared case-insensitively.
pub const VIDEO_ENCODING: &str = "h264";

/// The expected audio encoding (AAC, RFC 3640), compared case-insensitively.
pub const AUDIO_ENCODING: &str = "mpeg4-generic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
	Video,
	Audio,
}

impl fmt::Display for MediaKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Video => write!(f, "video"),
			Self::Audio => write!(f, "audio"),
		}
	}
}

/// Identifies a track within a session, used to route payload units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub usize);

impl fmt::Display for TrackId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Out-of-band codec configuration, as declared by the session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecParams {
	/// An AVCDecoderConfigurationRecord.
	AvcC(Bytes),
	AudioSpecificConfig(Bytes),
}

/// A single declared track within a [Description].
#[derive(Debug, Clone)]
pub struct TrackDescription {
	pub id: TrackId,
	/// The media type, ex. `video` or `audio`.
	pub media: String,
	/// The RTP encoding name, ex. `H264`.
	pub encoding: String,
	pub clock_rate: u32,
	pub channels: Option<u16>,
	pub params: Option<CodecParams>,
}

/// The negotiated session description: every track the endpoint offers, in declaration order.
#[derive(Debug, Clone)]
pub struct Description {
	pub base: Url,
	pub tracks: Vec<TrackDescription>,
}

/// What to do when more than one declared track matches a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPolicy {
	/// The first matching track in declaration order wins.
	#[default]
	First,
	/// Fail with [Error::AmbiguousTrack] instead of picking one.
	Unique,
}

impl FromStr for TrackPolicy {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"first" => Ok(Self::First),
			"unique" => Ok(Self::Unique),
			_ => Err(format!("unknown track policy: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
	pub id: TrackId,
	pub clock_rate: NonZeroU32,
	/// May be empty, in which case the parameter sets must arrive in-band.
	pub params: H264Params,
}

impl VideoTrack {
	fn matching(track: &TrackDescription) -> Option<Self> {
		if !track.media.eq_ignore_ascii_case("video") || !track.encoding.eq_ignore_ascii_case(VIDEO_ENCODING) {
			return None;
		}

		let clock_rate = NonZeroU32::new(track.clock_rate)?;

		let params = match &track.params {
			Some(CodecParams::AvcC(avcc)) => H264Params::from_avcc(avcc).unwrap_or_else(|err| {
				tracing::warn!(track = %track.id, %err, "ignoring malformed avcC, expecting in-band parameter sets");
				H264Params::default()
			}),
			_ => H264Params::default(),
		};

		Some(Self {
			id: track.id,
			clock_rate,
			params,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
	pub id: TrackId,
	pub clock_rate: NonZeroU32,
	pub config: AacConfig,
	pub hbr: AacHbr,
}

impl AudioTrack {
	fn matching(track: &TrackDescription) -> Option<Self> {
		if !track.media.eq_ignore_ascii_case("audio") || !track.encoding.eq_ignore_ascii_case(AUDIO_ENCODING) {
			return None;
		}

		let clock_rate = NonZeroU32::new(track.clock_rate)?;

		// ADTS needs the AudioSpecificConfig, so a track without one can't be recorded.
		let config = match &track.params {
			Some(CodecParams::AudioSpecificConfig(asc)) => match AacConfig::parse(asc) {
				Ok(config) => config,
				Err(err) => {
					tracing::warn!(track = %track.id, %err, "skipping audio track with unusable config");
					return None;
				}
			},
			_ => return None,
		};

		Some(Self {
			id: track.id,
			clock_rate,
			config,
			hbr: AacHbr::default(),
		})
	}
}

/// Pick the video and audio track out of a session description.
///
/// Fails with [Error::TrackNotFound] naming the missing kind, or with [Error::AmbiguousTrack]
/// when [TrackPolicy::Unique] is used and a kind has more than one candidate.
pub fn resolve(description: &Description, policy: TrackPolicy) -> Result<(VideoTrack, AudioTrack)> {
	if description.tracks.is_empty() {
		return Err(Error::TrackNotFound(MediaKind::Video));
	}

	let video = pick(description, policy, MediaKind::Video, VideoTrack::matching)?;
	let audio = pick(description, policy, MediaKind::Audio, AudioTrack::matching)?;

	tracing::debug!(video = %video.id, audio = %audio.id, "resolved tracks");

	Ok((video, audio))
}

fn pick<T>(
	description: &Description,
	policy: TrackPolicy,
	kind: MediaKind,
	matching: impl Fn(&TrackDescription) -> Option<T>,
) -> Result<T> {
	let mut candidates = description.tracks.iter().filter_map(matching);
	let first = candidates.next().ok_or(Error::TrackNotFound(kind))?;

	if candidates.next().is_some() {
		match policy {
			TrackPolicy::First => tracing::debug!(%kind, "ignoring duplicate tracks"),
			TrackPolicy::Unique => return Err(Error::AmbiguousTrack(kind)),
		}
	}

	Ok(first)
}
