use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mpeg2ts_reader::{demultiplex, pes, psi};

use super::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
	#[error("{0} trailing bytes")]
	Trailing(usize),
}

/// A reassembled PES packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pes {
	pub pid: u16,
	pub stream_id: u8,
	/// The 33-bit 90 kHz presentation timestamp.
	pub pts: Option<u64>,
	pub data: Bytes,
}

mpeg2ts_reader::packet_filter_switch! {
	Filter<Context> {
		Pat: demultiplex::PatPacketFilter<Context>,
		Pmt: demultiplex::PmtPacketFilter<Context>,
		Pes: pes::PesPacketFilter<Context, PesConsumer>,
		Null: demultiplex::NullPacketFilter<Context>,
	}
}

struct Partial {
	stream_id: u8,
	pts: Option<u64>,
	data: BytesMut,
}

/// The demuxer state shared by every filter.
#[derive(Default)]
pub struct Context {
	changeset: demultiplex::FilterChangeset<Filter>,

	// PID -> stream type
	streams: BTreeMap<u16, u8>,

	pending: BTreeMap<u16, Partial>,
	complete: Vec<Pes>,

	discontinuities: u64,
	malformed: u64,
}

impl Context {
	fn begin(&mut self, pid: u16, stream_id: u8, pts: Option<u64>, payload: &[u8]) {
		self.pending.insert(
			pid,
			Partial {
				stream_id,
				pts,
				data: BytesMut::from(payload),
			},
		);
	}

	fn finish(&mut self, pid: u16) {
		if let Some(partial) = self.pending.remove(&pid) {
			self.complete.push(Pes {
				pid,
				stream_id: partial.stream_id,
				pts: partial.pts,
				data: partial.data.freeze(),
			});
		}
	}
}

impl demultiplex::DemuxContext for Context {
	type F = Filter;

	fn filter_changeset(&mut self) -> &mut demultiplex::FilterChangeset<Self::F> {
		&mut self.changeset
	}

	fn construct(&mut self, req: demultiplex::FilterRequest<'_, '_>) -> Self::F {
		match req {
			demultiplex::FilterRequest::ByPid(psi::pat::PAT_PID) => Filter::Pat(demultiplex::PatPacketFilter::default()),
			demultiplex::FilterRequest::Pmt { pid, program_number } => {
				Filter::Pmt(demultiplex::PmtPacketFilter::new(pid, program_number))
			}
			demultiplex::FilterRequest::ByStream {
				stream_type,
				stream_info,
				..
			} => {
				let pid = u16::from(stream_info.elementary_pid());
				self.streams.insert(pid, stream_type.0);
				Filter::Pes(pes::PesPacketFilter::new(PesConsumer { pid }))
			}
			_ => Filter::Null(demultiplex::NullPacketFilter::default()),
		}
	}
}

/// Collects the PES packets of one elementary stream into the [Context].
pub struct PesConsumer {
	pid: u16,
}

impl pes::ElementaryStreamConsumer<Context> for PesConsumer {
	fn start_stream(&mut self, _ctx: &mut Context) {}

	fn begin_packet(&mut self, ctx: &mut Context, header: pes::PesHeader<'_>) {
		ctx.finish(self.pid);

		let stream_id = header.stream_id();
		match header.contents() {
			pes::PesContents::Parsed(Some(parsed)) => {
				let pts = match parsed.pts_dts() {
					Ok(pes::PtsDts::PtsOnly(Ok(pts))) | Ok(pes::PtsDts::Both { pts: Ok(pts), .. }) => Some(pts.value()),
					_ => None,
				};
				ctx.begin(self.pid, stream_id, pts, parsed.payload());
			}
			pes::PesContents::Payload(payload) => ctx.begin(self.pid, stream_id, None, payload),
			pes::PesContents::Parsed(None) => {
				tracing::warn!(pid = self.pid, "malformed PES header");
				ctx.malformed += 1;
			}
		}
	}

	fn continue_packet(&mut self, ctx: &mut Context, data: &[u8]) {
		if let Some(partial) = ctx.pending.get_mut(&self.pid) {
			partial.data.extend_from_slice(data);
		}
	}

	fn end_packet(&mut self, ctx: &mut Context) {
		ctx.finish(self.pid);
	}

	fn continuity_error(&mut self, ctx: &mut Context) {
		tracing::warn!(pid = self.pid, "continuity counter jump");
		ctx.discontinuities += 1;
	}
}

/// Demuxes a transport stream back into PES packets, using the PAT and PMT to find the streams.
pub struct TsReader {
	ctx: Context,
	demux: demultiplex::Demultiplex<Context>,

	// Bytes short of a whole packet.
	buffer: BytesMut,
	packets: u64,
}

impl TsReader {
	pub fn new() -> Self {
		let mut ctx = Context::default();
		let demux = demultiplex::Demultiplex::new(&mut ctx);

		Self {
			ctx,
			demux,
			buffer: BytesMut::new(),
			packets: 0,
		}
	}

	/// The elementary streams declared by the PMT, as PID to stream type.
	pub fn streams(&self) -> &BTreeMap<u16, u8> {
		&self.ctx.streams
	}

	pub fn packets(&self) -> u64 {
		self.packets
	}

	/// The number of continuity counter jumps seen.
	pub fn discontinuities(&self) -> u64 {
		self.ctx.discontinuities
	}

	/// The number of PES packets dropped because their header didn't parse.
	pub fn malformed(&self) -> u64 {
		self.ctx.malformed
	}

	/// Consume as many whole packets as possible, returning any PES packets they completed.
	pub fn decode<B: Buf>(&mut self, buf: &mut B) -> Vec<Pes> {
		self.buffer.put(buf);

		let whole = self.buffer.len() - self.buffer.len() % PACKET_SIZE;
		let packets = self.buffer.split_to(whole);
		self.demux.push(&mut self.ctx, &packets);
		self.packets += (whole / PACKET_SIZE) as u64;

		std::mem::take(&mut self.ctx.complete)
	}

	/// Flush any PES packets still waiting for the next start indicator.
	pub fn finish(&mut self) -> Result<Vec<Pes>, ReadError> {
		if !self.buffer.is_empty() {
			return Err(ReadError::Trailing(self.buffer.len()));
		}

		let pids: Vec<u16> = self.ctx.pending.keys().copied().collect();
		for pid in pids {
			self.ctx.finish(pid);
		}

		Ok(std::mem::take(&mut self.ctx.complete))
	}
}

impl Default for TsReader {
	fn default() -> Self {
		Self::new()
	}
}
