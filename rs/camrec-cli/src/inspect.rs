use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use camrec::codec::{self, AdtsHeader};
use camrec::container::{Pes, STREAM_TYPE_ADTS, STREAM_TYPE_H264, TsReader};
use tokio::io::AsyncReadExt;

/// What a single elementary stream of a recording contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
	pub stream_type: u8,
	/// PES packets, one per access unit.
	pub units: u64,
	/// Coded frames; several ADTS frames may share a PES packet.
	pub frames: u64,
	pub keyframes: u64,
	pub bytes: u64,
	pub first_pts: Option<u64>,
	pub last_pts: Option<u64>,
	/// Units with a timestamp earlier than the one before.
	pub out_of_order: u64,
}

impl StreamSummary {
	pub fn duration(&self) -> Duration {
		match (self.first_pts, self.last_pts) {
			(Some(first), Some(last)) => Duration::from_micros(last.saturating_sub(first) * 100 / 9),
			_ => Duration::ZERO,
		}
	}

	fn add(&mut self, pes: &Pes) -> anyhow::Result<()> {
		self.units += 1;
		self.bytes += pes.data.len() as u64;

		match self.stream_type {
			STREAM_TYPE_H264 => {
				self.frames += 1;
				self.keyframes += codec::is_keyframe(&codec::split_annexb(&pes.data)) as u64;
			}
			STREAM_TYPE_ADTS => {
				let mut data = &pes.data[..];
				while !data.is_empty() {
					let header = AdtsHeader::parse(data).context("invalid ADTS frame")?;
					data = data.get(header.frame_size..).context("truncated ADTS frame")?;
					self.frames += 1;
					self.keyframes += 1;
				}
			}
			_ => {}
		}

		if let Some(pts) = pes.pts {
			if self.last_pts.is_some_and(|last| pts < last) {
				self.out_of_order += 1;
			}

			self.first_pts.get_or_insert(pts);
			self.last_pts = Some(self.last_pts.map_or(pts, |last| last.max(pts)));
		}

		Ok(())
	}
}

#[derive(Debug, Default)]
pub struct Summary {
	pub packets: u64,
	pub discontinuities: u64,
	/// PES packets dropped for an unreadable header.
	pub malformed: u64,
	/// Keyed by PID.
	pub streams: BTreeMap<u16, StreamSummary>,
}

impl Summary {
	fn add(&mut self, reader: &TsReader, pes: Pes) -> anyhow::Result<()> {
		let stream_type = reader.streams().get(&pes.pid).copied().unwrap_or_default();
		let stream = self.streams.entry(pes.pid).or_insert_with(|| StreamSummary {
			stream_type,
			..Default::default()
		});

		stream.add(&pes).with_context(|| format!("stream {:#x}", pes.pid))
	}
}

/// Read back a recording and summarize its streams.
pub async fn inspect(path: &Path) -> anyhow::Result<Summary> {
	let mut file = tokio::fs::File::open(path)
		.await
		.with_context(|| format!("failed to open {}", path.display()))?;

	let mut reader = TsReader::new();
	let mut summary = Summary::default();
	let mut buffer = BytesMut::with_capacity(64 * 1024);

	while file.read_buf(&mut buffer).await? > 0 {
		for pes in reader.decode(&mut buffer) {
			summary.add(&reader, pes)?;
		}
	}

	for pes in reader.finish()? {
		summary.add(&reader, pes)?;
	}

	summary.packets = reader.packets();
	summary.discontinuities = reader.discontinuities();
	summary.malformed = reader.malformed();

	Ok(summary)
}

pub fn print(path: &Path, summary: &Summary) {
	println!(
		"{}: {} packets, {} discontinuities, {} malformed",
		path.display(),
		summary.packets,
		summary.discontinuities,
		summary.malformed
	);

	for (pid, stream) in &summary.streams {
		let kind = match stream.stream_type {
			STREAM_TYPE_H264 => "h264",
			STREAM_TYPE_ADTS => "aac",
			_ => "unknown",
		};

		println!(
			"  pid {pid:#06x} {kind}: {} units, {} frames, {} keyframes, {} bytes, {} long{}",
			stream.units,
			stream.frames,
			stream.keyframes,
			stream.bytes,
			humantime::format_duration(stream.duration()),
			match stream.out_of_order {
				0 => String::new(),
				n => format!(", {n} out of order"),
			},
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use camrec::MediaKind;
	use camrec::codec::AacConfig;
	use camrec::container::{AUDIO_PID, PesOptions, TsWriter, VIDEO_PID};

	#[tokio::test]
	async fn summarizes_recording() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("recording.ts");

		let mut writer = TsWriter::new(std::fs::File::create(&path).unwrap());
		writer.write_tables().unwrap();

		let idr = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 1, 0x65, 0x88, 0x84];
		let options = PesOptions {
			pts: 0,
			pcr: Some(0),
			random_access: true,
		};
		writer.write_pes(MediaKind::Video, options, &idr).unwrap();

		let slice = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 1, 0x41, 0x9A];
		let options = PesOptions {
			pts: 90_000,
			pcr: Some(90_000),
			random_access: false,
		};
		writer.write_pes(MediaKind::Video, options, &slice).unwrap();

		let config = AacConfig {
			profile: 2,
			sample_rate: 48_000,
			channels: 2,
		};
		let mut adts = Vec::new();
		for _ in 0..2 {
			adts.extend_from_slice(&config.adts_header(3).unwrap());
			adts.extend_from_slice(&[1, 2, 3]);
		}
		let options = PesOptions {
			pts: 1920,
			..Default::default()
		};
		writer.write_pes(MediaKind::Audio, options, &adts).unwrap();
		drop(writer);

		let summary = inspect(&path).await.unwrap();
		assert_eq!(summary.discontinuities, 0);
		assert_eq!(summary.malformed, 0);
		assert_eq!(summary.packets, 5);

		let video = &summary.streams[&VIDEO_PID];
		assert_eq!(video.units, 2);
		assert_eq!(video.keyframes, 1);
		assert_eq!(video.duration(), Duration::from_secs(1));
		assert_eq!(video.out_of_order, 0);

		let audio = &summary.streams[&AUDIO_PID];
		assert_eq!(audio.stream_type, STREAM_TYPE_ADTS);
		assert_eq!(audio.units, 1);
		assert_eq!(audio.frames, 2);
	}

	#[tokio::test]
	async fn missing_file() {
		let dir = tempfile::tempdir().unwrap();
		assert!(inspect(&dir.path().join("nope.ts")).await.is_err());
	}
}
