use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::codec::{self, AacConfig, H264Params, NalType};
use crate::container::{PesOptions, TsWriter};
use crate::depacketize::AccessUnit;
use crate::{AudioTrack, DecodeError, Error, MediaKind, Result, Timestamp, VideoTrack};

/// Where recordings go and how they're named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
	pub dir: PathBuf,
	/// Appended to the start time to form the file name.
	pub label: String,
}

impl Default for OutputConfig {
	fn default() -> Self {
		Self {
			dir: PathBuf::from("."),
			label: "living_room".to_string(),
		}
	}
}

impl OutputConfig {
	/// The file name for a recording that started at `start`, ex. `2024-05-01T12:00:00Z_living_room.ts`.
	///
	/// A non-zero `attempt` adds a suffix, used when the name is already taken.
	pub fn file_name(&self, start: OffsetDateTime, attempt: u32) -> Result<String> {
		let start = start.format(&Rfc3339).map_err(io::Error::other)?;

		Ok(match attempt {
			0 => format!("{start}_{}.ts", self.label),
			n => format!("{start}_{}-{n}.ts", self.label),
		})
	}
}

/// Counters for a single output file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
	pub video_units: u64,
	pub audio_units: u64,
	pub keyframes: u64,
	/// Video units dropped while waiting for the first keyframe.
	pub skipped: u64,
	pub bytes: u64,
	/// The largest 90 kHz timestamp written, relative to the clock base.
	pub duration: u64,
}

struct State {
	// None once closed.
	writer: Option<TsWriter<BufWriter<File>>>,

	params: H264Params,
	audio: AacConfig,

	// The first timestamp written on either track.
	base: Option<i64>,
	keyframe: bool,

	stats: MuxStats,
}

/// A shared MPEG-TS writer for one video and one audio track.
///
/// Cloning returns another handle to the same file; every write is serialized on one lock,
/// so the two tracks can write from different tasks.
#[derive(Clone)]
pub struct Muxer {
	path: Arc<PathBuf>,
	state: Arc<Mutex<State>>,
}

impl Muxer {
	/// Create a new file at `path` and write the PAT/PMT.
	///
	/// Fails if the file already exists.
	pub fn create(path: &Path, video: &VideoTrack, audio: &AudioTrack) -> Result<Self> {
		let file = OpenOptions::new().write(true).create_new(true).open(path)?;

		let mut writer = TsWriter::new(BufWriter::new(file));
		writer.write_tables()?;

		let state = State {
			writer: Some(writer),
			params: video.params.clone(),
			audio: audio.config,
			base: None,
			keyframe: false,
			stats: MuxStats::default(),
		};

		tracing::debug!(path = %path.display(), "created output file");

		Ok(Self {
			path: Arc::new(path.to_path_buf()),
			state: Arc::new(Mutex::new(state)),
		})
	}

	/// Create a new file inside the output directory, named after the current time.
	pub fn create_in(output: &OutputConfig, video: &VideoTrack, audio: &AudioTrack) -> Result<Self> {
		let start = OffsetDateTime::now_utc();

		for attempt in 0..1000 {
			let path = output.dir.join(output.file_name(start, attempt)?);
			match Self::create(&path, video, audio) {
				Err(Error::Write(err)) if err.kind() == io::ErrorKind::AlreadyExists => continue,
				res => return res,
			}
		}

		Err(Error::Write(io::Error::new(
			io::ErrorKind::AlreadyExists,
			"no free output file name",
		)))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn stats(&self) -> MuxStats {
		self.state.lock().stats
	}

	/// Write a video access unit.
	///
	/// Units before the first keyframe are skipped. Parameter sets are prepended to keyframes
	/// that don't carry them, and an in-band SPS/PPS that differs from the established one fails
	/// with [Error::FormatChange].
	pub fn write_video(&self, au: &AccessUnit) -> Result<()> {
		let mut state = self.state.lock();
		let state = &mut *state;

		let writer = state.writer.as_mut().ok_or_else(closed)?;

		if !state.keyframe {
			if !au.keyframe {
				state.stats.skipped += 1;
				return Ok(());
			}

			tracing::debug!(skipped = state.stats.skipped, "first keyframe");
			state.keyframe = true;
		}

		for nal in &au.data {
			let kind = nal.first().and_then(|header| NalType::from_header(*header));
			match kind {
				Some(NalType::Sps) => establish(&mut state.params.sps, nal, "SPS")?,
				Some(NalType::Pps) => establish(&mut state.params.pps, nal, "PPS")?,
				_ => {}
			}
		}

		let pts = map(&mut state.base, au.timestamp)?;
		let data = codec::annexb(&au.data, &state.params, au.keyframe);

		if au.keyframe {
			// Repeat the tables so the file can be cut at any keyframe.
			writer.write_tables()?;
		}

		let options = PesOptions {
			pts,
			pcr: Some(pts),
			random_access: au.keyframe,
		};
		writer.write_pes(MediaKind::Video, options, &data)?;

		state.stats.video_units += 1;
		state.stats.keyframes += au.keyframe as u64;
		state.stats.bytes += data.len() as u64;
		state.stats.duration = state.stats.duration.max(pts);

		Ok(())
	}

	/// Write an audio access unit, with an ADTS header per raw frame.
	///
	/// A frame too large for ADTS fails with [Error::Decode] and nothing is written.
	pub fn write_audio(&self, au: &AccessUnit) -> Result<()> {
		let mut state = self.state.lock();
		let state = &mut *state;

		let writer = state.writer.as_mut().ok_or_else(closed)?;

		let data = adts(&state.audio, &au.data)?;
		let pts = map(&mut state.base, au.timestamp)?;

		let options = PesOptions {
			pts,
			pcr: None,
			random_access: au.keyframe,
		};
		writer.write_pes(MediaKind::Audio, options, &data)?;

		state.stats.audio_units += 1;
		state.stats.bytes += data.len() as u64;
		state.stats.duration = state.stats.duration.max(pts);

		Ok(())
	}

	/// Flush and sync the file. Later writes fail; closing again is a no-op.
	pub fn close(&self) -> Result<MuxStats> {
		let mut state = self.state.lock();

		let Some(writer) = state.writer.take() else {
			return Ok(state.stats);
		};

		let file = writer.into_inner().into_inner().map_err(|err| err.into_error())?;
		file.sync_all()?;

		tracing::debug!(path = %self.path.display(), stats = ?state.stats, "closed output file");

		Ok(state.stats)
	}
}

fn closed() -> Error {
	Error::Write(io::Error::other("muxer is closed"))
}

// Parameter sets are fixed once known; the container can't signal a change.
fn establish(current: &mut Option<Bytes>, nal: &Bytes, name: &str) -> Result<()> {
	match current {
		Some(current) if current != nal => Err(Error::FormatChange(format!("{name} changed mid-stream"))),
		Some(_) => Ok(()),
		None => {
			tracing::debug!(size = nal.len(), "{name} received in-band");
			*current = Some(nal.clone());
			Ok(())
		}
	}
}

// Map a track-local timestamp onto the shared 90 kHz clock.
fn map(base: &mut Option<i64>, timestamp: Timestamp) -> Result<u64> {
	let value = timestamp.to_90khz().map_err(DecodeError::from)?;
	let base = *base.get_or_insert(value);

	match value.checked_sub(base) {
		Some(pts) if pts >= 0 => Ok(pts as u64),
		_ => {
			tracing::debug!(?timestamp, base, "timestamp before the clock base, clamping to zero");
			Ok(0)
		}
	}
}

fn adts(config: &AacConfig, frames: &[Bytes]) -> Result<Bytes> {
	let size = frames.iter().map(|frame| frame.len() + codec::ADTS_HEADER_SIZE).sum();
	let mut data = BytesMut::with_capacity(size);

	for frame in frames {
		data.put_slice(&config.adts_header(frame.len())?);
		data.put_slice(frame);
	}

	Ok(data.freeze())
}

#[cfg(test)]
mod tests {
	use std::num::NonZeroU32;

	use super::*;
	use crate::TrackId;
	use crate::container::{AUDIO_PID, TsReader, VIDEO_PID};
	use crate::depacketize::AacHbr;

	const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xAA];
	const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

	const VIDEO_CLOCK: NonZeroU32 = NonZeroU32::new(90_000).unwrap();
	const AUDIO_CLOCK: NonZeroU32 = NonZeroU32::new(48_000).unwrap();

	fn tracks() -> (VideoTrack, AudioTrack) {
		let video = VideoTrack {
			id: TrackId(0),
			clock_rate: VIDEO_CLOCK,
			params: H264Params {
				sps: Some(Bytes::from_static(SPS)),
				pps: Some(Bytes::from_static(PPS)),
			},
		};

		let audio = AudioTrack {
			id: TrackId(1),
			clock_rate: AUDIO_CLOCK,
			config: AacConfig::parse(&[0x11, 0x90]).unwrap(),
			hbr: AacHbr::default(),
		};

		(video, audio)
	}

	fn video(ticks: i64, keyframe: bool, nals: &[&'static [u8]]) -> AccessUnit {
		AccessUnit {
			timestamp: Timestamp::new(ticks, VIDEO_CLOCK),
			keyframe,
			data: nals.iter().map(|nal| Bytes::from_static(nal)).collect(),
		}
	}

	fn audio(ticks: i64, frame: &'static [u8]) -> AccessUnit {
		AccessUnit {
			timestamp: Timestamp::new(ticks, AUDIO_CLOCK),
			keyframe: true,
			data: vec![Bytes::from_static(frame)],
		}
	}

	fn read(path: &Path) -> Vec<crate::container::Pes> {
		let data = std::fs::read(path).unwrap();
		let mut reader = TsReader::new();
		let mut pes = reader.decode(&mut &data[..]);
		pes.extend(reader.finish().unwrap());
		assert_eq!(reader.discontinuities(), 0);
		pes
	}

	#[test]
	fn round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.ts");
		let (v, a) = tracks();

		let muxer = Muxer::create(&path, &v, &a).unwrap();
		muxer.write_video(&video(9000, true, &[&[0x65, 0x88, 0x84]])).unwrap();
		muxer.write_audio(&audio(4800, &[0x21, 0x10, 0x04])).unwrap();
		muxer.write_video(&video(12000, false, &[&[0x41, 0x9A]])).unwrap();
		muxer.write_audio(&audio(5824, &[0x21, 0x10, 0x05])).unwrap();

		let stats = muxer.close().unwrap();
		assert_eq!(stats.video_units, 2);
		assert_eq!(stats.audio_units, 2);
		assert_eq!(stats.keyframes, 1);

		let pes = read(&path);
		let video: Vec<_> = pes.iter().filter(|pes| pes.pid == VIDEO_PID).collect();
		let audio: Vec<_> = pes.iter().filter(|pes| pes.pid == AUDIO_PID).collect();

		// The base comes from the first unit written, on either track.
		assert_eq!(video[0].pts, Some(0));
		assert_eq!(video[1].pts, Some(3000));
		assert_eq!(audio[0].pts, Some(0));
		assert_eq!(audio[1].pts, Some(1920));

		let nals = codec::split_annexb(&video[0].data);
		assert_eq!(nals[0], Bytes::from_static(&[0x09, 0xF0]));
		assert_eq!(nals[1], Bytes::from_static(SPS));
		assert_eq!(nals[2], Bytes::from_static(PPS));
		assert_eq!(nals[3], Bytes::from_static(&[0x65, 0x88, 0x84]));
		assert!(codec::is_keyframe(&nals));

		let header = codec::AdtsHeader::parse(&audio[0].data).unwrap();
		assert_eq!(header.frame_size, audio[0].data.len());
		assert_eq!(&audio[0].data[header.header_size..], &[0x21, 0x10, 0x04]);
	}

	#[test]
	fn waits_for_keyframe() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.ts");
		let (v, a) = tracks();

		let muxer = Muxer::create(&path, &v, &a).unwrap();
		muxer.write_video(&video(0, false, &[&[0x41, 0x01]])).unwrap();
		muxer.write_video(&video(3000, false, &[&[0x41, 0x02]])).unwrap();
		muxer.write_video(&video(6000, true, &[&[0x65, 0x03]])).unwrap();

		let stats = muxer.close().unwrap();
		assert_eq!(stats.skipped, 2);
		assert_eq!(stats.video_units, 1);

		let pes = read(&path);
		assert_eq!(pes.len(), 1);
		assert_eq!(pes[0].pts, Some(0));
	}

	#[test]
	fn format_change() {
		let dir = tempfile::tempdir().unwrap();
		let (v, a) = tracks();

		let muxer = Muxer::create(&dir.path().join("out.ts"), &v, &a).unwrap();

		// The same SPS in-band is fine.
		muxer.write_video(&video(0, true, &[SPS, PPS, &[0x65, 0x01]])).unwrap();

		let err = muxer
			.write_video(&video(3000, true, &[&[0x67, 0x64, 0x00, 0x28], PPS, &[0x65, 0x01]]))
			.unwrap_err();
		assert!(matches!(err, Error::FormatChange(_)));
		assert!(err.is_fatal());
	}

	#[test]
	fn learns_parameter_sets_in_band() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.ts");
		let (mut v, a) = tracks();
		v.params = H264Params::default();

		let muxer = Muxer::create(&path, &v, &a).unwrap();
		muxer.write_video(&video(0, true, &[SPS, PPS, &[0x65, 0x01]])).unwrap();
		muxer.write_video(&video(3000, true, &[&[0x65, 0x02]])).unwrap();
		muxer.close().unwrap();

		let pes = read(&path);
		let nals = codec::split_annexb(&pes[1].data);
		assert_eq!(nals[1], Bytes::from_static(SPS));
	}

	#[test]
	fn oversized_adts_is_not_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let (v, a) = tracks();

		let muxer = Muxer::create(&dir.path().join("out.ts"), &v, &a).unwrap();

		let huge = AccessUnit {
			timestamp: Timestamp::new(0, AUDIO_CLOCK),
			keyframe: true,
			data: vec![Bytes::from(vec![0u8; 9000])],
		};
		let err = muxer.write_audio(&huge).unwrap_err();
		assert!(matches!(err, Error::Decode(DecodeError::TooLarge(_))));
		assert!(!err.is_fatal());

		muxer.write_audio(&audio(1024, &[0x21])).unwrap();
		assert_eq!(muxer.stats().audio_units, 1);
	}

	#[test]
	fn clamps_before_base() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("out.ts");
		let (v, a) = tracks();

		let muxer = Muxer::create(&path, &v, &a).unwrap();
		muxer.write_audio(&audio(48_000, &[0x21])).unwrap();
		muxer.write_video(&video(45_000, true, &[&[0x65, 0x01]])).unwrap();
		muxer.close().unwrap();

		let pes = read(&path);
		assert!(pes.iter().all(|pes| pes.pts == Some(0)));
	}

	#[test]
	fn close_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let (v, a) = tracks();

		let muxer = Muxer::create(&dir.path().join("out.ts"), &v, &a).unwrap();
		let clone = muxer.clone();

		muxer.close().unwrap();
		assert!(clone.close().is_ok());
		assert!(matches!(clone.write_audio(&audio(0, &[0x21])), Err(Error::Write(_))));
	}

	#[test]
	fn file_names() {
		let dir = tempfile::tempdir().unwrap();
		let output = OutputConfig {
			dir: dir.path().to_path_buf(),
			label: "porch".to_string(),
		};

		let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
		assert_eq!(output.file_name(start, 0).unwrap(), "2023-11-14T22:13:20Z_porch.ts");
		assert_eq!(output.file_name(start, 2).unwrap(), "2023-11-14T22:13:20Z_porch-2.ts");

		let (v, a) = tracks();
		let first = Muxer::create_in(&output, &v, &a).unwrap();
		let second = Muxer::create_in(&output, &v, &a).unwrap();
		assert_ne!(first.path(), second.path());
		assert!(second.path().starts_with(dir.path()));
	}

	#[test]
	fn create_fails_without_directory() {
		let dir = tempfile::tempdir().unwrap();
		let (v, a) = tracks();

		let err = Muxer::create(&dir.path().join("missing/out.ts"), &v, &a).err().unwrap();
		assert!(matches!(err, Error::Write(_)));
	}
}
