use std::io::{self, Write};

use bytes::{BufMut, BytesMut};

use super::*;

/// Serializes PSI tables and PES packets into 188-byte transport stream packets.
pub struct TsWriter<W: Write> {
	inner: W,

	// Indexed by PAT, PMT, video, audio.
	continuity: [u8; 4],
}

/// Options for a single PES packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PesOptions {
	/// The 90 kHz presentation timestamp, truncated to 33 bits.
	pub pts: u64,
	/// Carry a PCR with this 90 kHz value.
	pub pcr: Option<u64>,
	/// Set the random access indicator, ex. for keyframes.
	pub random_access: bool,
}

impl<W: Write> TsWriter<W> {
	pub fn new(inner: W) -> Self {
		Self {
			inner,
			continuity: [0; 4],
		}
	}

	pub fn into_inner(self) -> W {
		self.inner
	}

	/// Write the PAT and PMT.
	pub fn write_tables(&mut self) -> io::Result<()> {
		self.write_section(PAT_PID, &pat())?;
		self.write_section(PMT_PID, &pmt())
	}

	/// Write one access unit as a PES packet, split across as many TS packets as needed.
	pub fn write_pes(&mut self, kind: MediaKind, options: PesOptions, data: &[u8]) -> io::Result<()> {
		let (pid, stream_id, _) = stream(kind);

		let mut pes = BytesMut::with_capacity(14 + data.len());
		pes.put_slice(&[0x00, 0x00, 0x01, stream_id]);

		// Unbounded (0) is only allowed for video, but audio frames are always far smaller.
		let length = 8 + data.len();
		pes.put_u16(u16::try_from(length).unwrap_or(0));

		pes.put_u8(0x80); // marker bits, not scrambled
		pes.put_u8(0x80); // PTS only
		pes.put_u8(0x05); // header data length
		pes.put_slice(&encode_pts(options.pts));
		pes.put_slice(data);

		let mut adaptation = Vec::new();
		if options.random_access || options.pcr.is_some() {
			let mut flags = 0;
			if options.random_access {
				flags |= 0x40;
			}
			if options.pcr.is_some() {
				flags |= 0x10;
			}
			adaptation.push(flags);

			if let Some(pcr) = options.pcr {
				adaptation.extend_from_slice(&encode_pcr(pcr));
			}
		}

		let mut remaining = &pes[..];
		let mut first = true;

		while !remaining.is_empty() || first {
			let af = match first {
				true => std::mem::take(&mut adaptation),
				false => Vec::new(),
			};

			let written = self.write_packet(pid, first, af, remaining)?;
			remaining = &remaining[written..];
			first = false;
		}

		Ok(())
	}

	fn write_section(&mut self, pid: u16, section: &[u8]) -> io::Result<()> {
		let mut payload = Vec::with_capacity(section.len() + 1);
		payload.push(0x00); // pointer field
		payload.extend_from_slice(section);

		let mut packet = [0xFFu8; PACKET_SIZE];
		packet[..4].copy_from_slice(&self.header(pid, true, false));
		packet[4..4 + payload.len()].copy_from_slice(&payload);

		self.inner.write_all(&packet)?;

		Ok(())
	}

	/// Write a single packet, returning how many payload bytes it consumed.
	///
	/// `adaptation` is the adaptation field body without its length byte; it's padded with stuffing
	/// when the payload doesn't fill the packet.
	fn write_packet(&mut self, pid: u16, start: bool, mut adaptation: Vec<u8>, payload: &[u8]) -> io::Result<usize> {
		let mut has_adaptation = !adaptation.is_empty();
		let overhead = if has_adaptation { 1 + adaptation.len() } else { 0 };

		let room = PACKET_SIZE - 4 - overhead;
		let size = payload.len().min(room);
		let stuffing = room - size;

		if stuffing > 0 {
			if has_adaptation {
				adaptation.resize(adaptation.len() + stuffing, 0xFF);
			} else if stuffing > 1 {
				// A length byte, an empty flags byte, and the rest stuffing.
				adaptation.push(0x00);
				adaptation.resize(stuffing - 1, 0xFF);
			}
			// Otherwise a lone length byte of 0 fills the gap.
			has_adaptation = true;
		}

		let mut packet = Vec::with_capacity(PACKET_SIZE);
		packet.extend_from_slice(&self.header(pid, start, has_adaptation));
		if has_adaptation {
			packet.push(adaptation.len() as u8);
			packet.extend_from_slice(&adaptation);
		}
		packet.extend_from_slice(&payload[..size]);

		debug_assert_eq!(packet.len(), PACKET_SIZE);

		self.inner.write_all(&packet)?;

		Ok(size)
	}

	fn header(&mut self, pid: u16, start: bool, adaptation: bool) -> [u8; 4] {
		let counter = &mut self.continuity[counter_index(pid)];
		let cc = *counter;
		*counter = (cc + 1) & 0x0F;

		let control = if adaptation { 0x30 } else { 0x10 };

		[
			SYNC_BYTE,
			((start as u8) << 6) | ((pid >> 8) as u8 & 0x1F),
			pid as u8,
			control | cc,
		]
	}
}

fn counter_index(pid: u16) -> usize {
	match pid {
		PAT_PID => 0,
		PMT_PID => 1,
		VIDEO_PID => 2,
		_ => 3,
	}
}

fn pat() -> Vec<u8> {
	let mut section = vec![0x00, 0xB0, 0x0D];
	section.extend_from_slice(&TRANSPORT_STREAM_ID.to_be_bytes());
	section.extend_from_slice(&[0xC1, 0x00, 0x00]); // version 0, current, section 0 of 0
	section.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
	section.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());
	section.extend_from_slice(&crc32(&section).to_be_bytes());
	section
}

fn pmt() -> Vec<u8> {
	let mut section = vec![0x02, 0xB0, 0x17];
	section.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
	section.extend_from_slice(&[0xC1, 0x00, 0x00]);
	section.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes()); // PCR PID
	section.extend_from_slice(&[0xF0, 0x00]); // no program descriptors

	for kind in [MediaKind::Video, MediaKind::Audio] {
		let (pid, _, stream_type) = stream(kind);
		section.push(stream_type);
		section.extend_from_slice(&(0xE000 | pid).to_be_bytes());
		section.extend_from_slice(&[0xF0, 0x00]);
	}

	section.extend_from_slice(&crc32(&section).to_be_bytes());
	section
}

fn encode_pts(pts: u64) -> [u8; 5] {
	let pts = pts & MAX_PTS;
	[
		0x20 | ((pts >> 29) as u8 & 0x0E) | 0x01,
		(pts >> 22) as u8,
		((pts >> 14) as u8 & 0xFE) | 0x01,
		(pts >> 7) as u8,
		((pts << 1) as u8 & 0xFE) | 0x01,
	]
}

fn encode_pcr(pcr: u64) -> [u8; 6] {
	let base = pcr & MAX_PTS;
	[
		(base >> 25) as u8,
		(base >> 17) as u8,
		(base >> 9) as u8,
		(base >> 1) as u8,
		((base & 1) as u8) << 7 | 0x7E,
		0x00,
	]
}
