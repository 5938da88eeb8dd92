//! A scripted in-memory endpoint, so sessions can be tested without a camera.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use url::Url;

use crate::container::{AUDIO_PID, TsReader, VIDEO_PID};
use crate::depacketize::PayloadUnit;
use crate::session::{Connection, Connector, PacketStream, SessionSummary};
use crate::{
	CodecParams, DecodeError, Description, Error, MediaKind, MuxStats, Result, Timestamp, TrackDescription, TrackId,
};

pub const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1F, 0xAA];
pub const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
pub const ASC: &[u8] = &[0x11, 0x90];

const VIDEO: TrackId = TrackId(0);
const AUDIO: TrackId = TrackId(1);

const VIDEO_CLOCK: NonZeroU32 = NonZeroU32::new(90_000).unwrap();
const AUDIO_CLOCK: NonZeroU32 = NonZeroU32::new(48_000).unwrap();

/// One scripted connection attempt.
pub struct Attempt {
	refused: bool,
	description: Description,
	packets: Vec<PayloadUnit>,
	// None ends the stream cleanly.
	end: Option<Error>,
	hold_open: bool,
}

impl Attempt {
	/// Connects, describes both tracks, and plays `packets` before the stream ends.
	pub fn playing(packets: Vec<PayloadUnit>) -> Self {
		Self::described(description()).with_packets(packets)
	}

	/// Connects and returns `description`.
	pub fn described(description: Description) -> Self {
		Self {
			refused: false,
			description,
			packets: Vec::new(),
			end: None,
			hold_open: false,
		}
	}

	pub fn refused() -> Self {
		Self {
			refused: true,
			..Self::described(description())
		}
	}

	pub fn with_packets(mut self, packets: Vec<PayloadUnit>) -> Self {
		self.packets = packets;
		self
	}

	/// Keep the stream open after the last packet, until the session is cancelled.
	pub fn hold_open(mut self) -> Self {
		self.hold_open = true;
		self
	}

	/// End the stream with an error instead of cleanly.
	pub fn ending_with(mut self, err: Error) -> Self {
		self.end = Some(err);
		self
	}
}

#[derive(Default)]
pub struct MockConnector {
	attempts: Mutex<VecDeque<Attempt>>,
	connects: AtomicUsize,
}

impl MockConnector {
	pub fn new(attempts: Vec<Attempt>) -> Self {
		Self {
			attempts: Mutex::new(attempts.into()),
			connects: AtomicUsize::new(0),
		}
	}

	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}
}

impl Connector for MockConnector {
	type Connection = MockConnection;

	fn connect(&self, _url: &Url) -> impl Future<Output = Result<Self::Connection>> + Send {
		self.connects.fetch_add(1, Ordering::SeqCst);
		let attempt = self.attempts.lock().pop_front();

		async move {
			match attempt {
				None => Err(Error::Connection("no more scripted attempts".to_string())),
				Some(attempt) if attempt.refused => Err(Error::Connection("connection refused".to_string())),
				Some(attempt) => Ok(MockConnection { attempt }),
			}
		}
	}
}

pub struct MockConnection {
	attempt: Attempt,
}

impl Connection for MockConnection {
	fn describe(&mut self) -> impl Future<Output = Result<Description>> + Send {
		let description = self.attempt.description.clone();
		async move { Ok(description) }
	}

	fn play(self, _tracks: &[TrackId]) -> impl Future<Output = Result<PacketStream>> + Send {
		let Attempt {
			packets, end, hold_open, ..
		} = self.attempt;

		async move {
			let packets = futures::stream::iter(packets.into_iter().map(Ok));

			let stream: PacketStream = match (hold_open, end) {
				(true, _) => packets.chain(futures::stream::pending()).boxed(),
				(false, Some(err)) => packets.chain(futures::stream::once(async move { Err(err) })).boxed(),
				(false, None) => packets.boxed(),
			};

			Ok(stream)
		}
	}
}

fn avcc() -> Bytes {
	let mut avcc = vec![1, 0x42, 0x00, 0x1F, 0xFF, 0xE1, 0x00, SPS.len() as u8];
	avcc.extend_from_slice(SPS);
	avcc.extend_from_slice(&[0x01, 0x00, PPS.len() as u8]);
	avcc.extend_from_slice(PPS);
	avcc.into()
}

fn video_track() -> TrackDescription {
	TrackDescription {
		id: VIDEO,
		media: "video".to_string(),
		encoding: "h264".to_string(),
		clock_rate: VIDEO_CLOCK.get(),
		channels: None,
		params: Some(CodecParams::AvcC(avcc())),
	}
}

fn audio_track() -> TrackDescription {
	TrackDescription {
		id: AUDIO,
		media: "audio".to_string(),
		encoding: "mpeg4-generic".to_string(),
		clock_rate: AUDIO_CLOCK.get(),
		channels: Some(2),
		params: Some(CodecParams::AudioSpecificConfig(Bytes::from_static(ASC))),
	}
}

fn base() -> Url {
	Url::parse("rtsp://camera.local:554/Preview_01_main").unwrap()
}

/// A camera offering H.264 video and AAC audio.
pub fn description() -> Description {
	Description {
		base: base(),
		tracks: vec![video_track(), audio_track()],
	}
}

/// A camera without a microphone.
pub fn video_only() -> Description {
	Description {
		base: base(),
		tracks: vec![video_track()],
	}
}

/// The i-th video packet: a keyframe first, then P slices, one access unit per packet.
pub fn video_packet(i: usize) -> PayloadUnit {
	let payload = match i {
		0 => vec![0x65, 0x88, 0x84, 0x00],
		i => vec![0x41, 0x9A, i as u8],
	};

	unit(VIDEO, 1000 + i as u16, Timestamp::new(i as i64 * 3000, VIDEO_CLOCK), payload)
}

/// The i-th audio packet: a single AAC frame behind an AU header.
pub fn audio_packet(i: usize) -> PayloadUnit {
	let frame = [0x21, 0x10, i as u8];
	let mut payload = vec![0x00, 0x10];
	payload.extend_from_slice(&((frame.len() as u16) << 3).to_be_bytes());
	payload.extend_from_slice(&frame);

	unit(AUDIO, 2000 + i as u16, Timestamp::new(i as i64 * 1024, AUDIO_CLOCK), payload)
}

/// A video packet with the forbidden bit set.
pub fn malformed_video(i: usize) -> PayloadUnit {
	unit(VIDEO, 1000 + i as u16, Timestamp::new(i as i64 * 3000, VIDEO_CLOCK), vec![0xE5, 0x00])
}

/// A keyframe whose in-band SPS differs from the one in the description, as a STAP-A.
pub fn format_change(i: usize) -> PayloadUnit {
	let sps = [0x67, 0x64, 0x00, 0x28, 0xBB];
	let idr = [0x65, 0x88, 0x84, i as u8];

	let mut payload = vec![24];
	for nal in [&sps[..], &idr[..]] {
		payload.extend_from_slice(&(nal.len() as u16).to_be_bytes());
		payload.extend_from_slice(nal);
	}

	unit(VIDEO, 1000 + i as u16, Timestamp::new(i as i64 * 3000, VIDEO_CLOCK), payload)
}

/// `video` video packets and `audio` audio packets, interleaved.
pub fn packets(video: usize, audio: usize) -> Vec<PayloadUnit> {
	let mut packets = Vec::with_capacity(video + audio);
	for i in 0..video.max(audio) {
		if i < video {
			packets.push(video_packet(i));
		}
		if i < audio {
			packets.push(audio_packet(i));
		}
	}
	packets
}

fn unit(track: TrackId, sequence: u16, timestamp: Timestamp, payload: Vec<u8>) -> PayloadUnit {
	PayloadUnit {
		track,
		sequence,
		rtp_timestamp: timestamp.ticks() as u32,
		timestamp: Some(timestamp),
		marker: true,
		lost: 0,
		payload: payload.into(),
	}
}

/// Count the video and audio PES packets of a recording.
pub fn count(path: &Path) -> (usize, usize) {
	let data = std::fs::read(path).unwrap();
	let mut reader = TsReader::new();
	let mut pes = reader.decode(&mut &data[..]);
	pes.extend(reader.finish().unwrap());

	let video = pes.iter().filter(|pes| pes.pid == VIDEO_PID).count();
	let audio = pes.iter().filter(|pes| pes.pid == AUDIO_PID).count();
	(video, audio)
}

/// An [crate::Observer] that remembers what it saw.
#[derive(Default)]
pub struct RecordingObserver {
	files: Mutex<Vec<PathBuf>>,
	retries: Mutex<Vec<Duration>>,
	connected: AtomicUsize,
	terminated: AtomicUsize,
	decode_errors: AtomicUsize,
	write_errors: AtomicUsize,
	lost: AtomicU64,
	stats: Mutex<Option<MuxStats>>,
}

impl RecordingObserver {
	pub fn files(&self) -> Vec<PathBuf> {
		self.files.lock().clone()
	}

	pub fn retries(&self) -> Vec<Duration> {
		self.retries.lock().clone()
	}

	pub fn connected(&self) -> usize {
		self.connected.load(Ordering::SeqCst)
	}

	pub fn terminated(&self) -> usize {
		self.terminated.load(Ordering::SeqCst)
	}

	pub fn decode_errors(&self) -> usize {
		self.decode_errors.load(Ordering::SeqCst)
	}

	pub fn write_errors(&self) -> usize {
		self.write_errors.load(Ordering::SeqCst)
	}

	pub fn lost(&self) -> u64 {
		self.lost.load(Ordering::SeqCst)
	}

	/// The stats from the latest progress report.
	pub fn stats(&self) -> Option<MuxStats> {
		*self.stats.lock()
	}
}

impl crate::Observer for RecordingObserver {
	fn connected(&self, _url: &Url) {
		self.connected.fetch_add(1, Ordering::SeqCst);
	}

	fn file_opened(&self, path: &Path) {
		self.files.lock().push(path.to_path_buf());
	}

	fn packet_lost(&self, _track: TrackId, _kind: MediaKind, count: u16, _cause: &str) {
		self.lost.fetch_add(count as u64, Ordering::SeqCst);
	}

	fn decode_error(&self, _kind: MediaKind, _err: &DecodeError) {
		self.decode_errors.fetch_add(1, Ordering::SeqCst);
	}

	fn write_error(&self, _err: &Error) {
		self.write_errors.fetch_add(1, Ordering::SeqCst);
	}

	fn progress(&self, stats: &MuxStats) {
		*self.stats.lock() = Some(*stats);
	}

	fn terminated(&self, _result: &Result<SessionSummary>) {
		self.terminated.fetch_add(1, Ordering::SeqCst);
	}

	fn retrying(&self, _attempt: u32, delay: Duration, _err: &Error) {
		self.retries.lock().push(delay);
	}
}
