use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::session::SessionSummary;
use crate::{AudioTrack, DecodeError, Error, MediaKind, MuxStats, Result, TrackId, VideoTrack};

/// Hooks for the observable events of a recording.
///
/// Passed explicitly through [crate::SessionConfig]; every method defaults to a no-op.
/// Methods are called from the session and track tasks, so they should return quickly.
pub trait Observer: Send + Sync + 'static {
	/// The transport to the endpoint is open.
	fn connected(&self, _url: &Url) {}

	/// Both tracks were resolved and playback started.
	fn playing(&self, _video: &VideoTrack, _audio: &AudioTrack) {}

	fn file_opened(&self, _path: &Path) {}

	/// Packets were lost before this one arrived. Never fatal.
	fn packet_lost(&self, _track: TrackId, _kind: MediaKind, _count: u16, _cause: &str) {}

	/// A single access unit was discarded. Never fatal.
	fn decode_error(&self, _kind: MediaKind, _err: &DecodeError) {}

	/// The muxer failed; the session is about to end.
	fn write_error(&self, _err: &Error) {}

	/// Called periodically while recording.
	fn progress(&self, _stats: &MuxStats) {}

	/// The session ended, cleanly or not.
	fn terminated(&self, _result: &Result<SessionSummary>) {}

	/// A transient failure; the next attempt starts after `delay`.
	fn retrying(&self, _attempt: u32, _delay: Duration, _err: &Error) {}
}

/// The default [Observer], emitting one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
	fn connected(&self, url: &Url) {
		tracing::info!(url = %redact(url), "connected");
	}

	fn playing(&self, video: &VideoTrack, audio: &AudioTrack) {
		tracing::info!(
			video = %video.id,
			audio = %audio.id,
			sample_rate = audio.config.sample_rate,
			channels = audio.config.channels,
			in_band = !video.params.is_complete(),
			"playing"
		);
	}

	fn file_opened(&self, path: &Path) {
		tracing::info!(path = %path.display(), "recording");
	}

	fn packet_lost(&self, track: TrackId, kind: MediaKind, count: u16, cause: &str) {
		tracing::warn!(%track, %kind, count, cause, "packet loss");
	}

	fn decode_error(&self, kind: MediaKind, err: &DecodeError) {
		tracing::warn!(%kind, %err, "decode error");
	}

	fn write_error(&self, err: &Error) {
		tracing::error!(%err, "write error");
	}

	fn progress(&self, stats: &MuxStats) {
		let recorded = Duration::from_millis(stats.duration / 90);
		tracing::debug!(
			recorded = %humantime::format_duration(recorded),
			video = stats.video_units,
			audio = stats.audio_units,
			bytes = stats.bytes,
			"progress"
		);
	}

	fn terminated(&self, result: &Result<SessionSummary>) {
		match result {
			Ok(summary) => tracing::info!(
				video = summary.stats.video_units,
				audio = summary.stats.audio_units,
				"stream terminated cleanly"
			),
			Err(err) => tracing::warn!(%err, "stream terminated"),
		}
	}

	fn retrying(&self, attempt: u32, delay: Duration, err: &Error) {
		tracing::warn!(attempt, ?delay, %err, "reconnecting");
	}
}

/// Hide the password of a URL before it's logged.
pub fn redact(url: &Url) -> Url {
	let mut url = url.clone();
	if url.password().is_some() {
		// Only fails for URLs that can't have credentials, which can't have a password either.
		let _ = url.set_password(Some("xxx"));
	}
	url
}
