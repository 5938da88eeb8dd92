//! Reassemble RTP payloads into timestamped access units, one decoder per track.
//!
//! The codec-specific work lives behind [Depacketize]. [Depacketizer] wraps it with the
//! behavior shared by every track: holding back units that don't have a timestamp yet,
//! and a bounded reorder buffer so output is never out of order.

mod aac;
mod h264;

pub use aac::*;
pub use h264::*;

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{DecodeError, MediaKind, Timestamp, TrackId};

/// The largest access unit we'll buffer before giving up on it.
pub const MAX_ACCESS_UNIT_SIZE: usize = 8 * 1024 * 1024;

/// The most NAL units a single video access unit may contain.
pub const MAX_ACCESS_UNIT_NALS: usize = 1024;

/// One inbound RTP packet for a track.
#[derive(Debug, Clone)]
pub struct PayloadUnit {
	pub track: TrackId,
	pub sequence: u16,
	pub rtp_timestamp: u32,
	/// The presentation timestamp, if the transport could derive one.
	pub timestamp: Option<Timestamp>,
	/// The RTP marker bit, set on the last packet of an access unit.
	pub marker: bool,
	/// The number of packets lost immediately before this one.
	pub lost: u16,
	pub payload: Bytes,
}

/// One decodable unit of media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
	pub timestamp: Timestamp,
	pub keyframe: bool,
	/// The NAL units (without start codes) for video, or a single raw frame for audio.
	pub data: Vec<Bytes>,
}

impl AccessUnit {
	pub fn size(&self) -> usize {
		self.data.iter().map(Bytes::len).sum()
	}
}

/// Codec-specific reassembly of payload units into access units.
///
/// Units are pushed in arrival order with a resolved timestamp. On error, the in-progress
/// access unit must be discarded so the next well-formed payload decodes normally.
pub trait Depacketize: Send + 'static {
	const KIND: MediaKind;

	fn push(&mut self, unit: PayloadUnit, timestamp: Timestamp, out: &mut Vec<AccessUnit>) -> Result<(), DecodeError>;

	/// Emit any access unit that is complete but still waiting for a boundary.
	fn finish(&mut self, out: &mut Vec<AccessUnit>);
}

/// Decodes one track, enforcing non-decreasing timestamps on the output.
pub struct Depacketizer<D: Depacketize> {
	inner: D,
	gate: TimestampGate,
	reorder: Reorder,

	// Units that were ready when a later unit in the same call failed to decode.
	ready: Vec<AccessUnit>,
}

impl<D: Depacketize> Depacketizer<D> {
	pub fn new(inner: D, reorder_depth: usize, pending_limit: usize) -> Self {
		Self {
			inner,
			gate: TimestampGate::new(pending_limit),
			reorder: Reorder::new(reorder_depth),
			ready: Vec::new(),
		}
	}

	/// Decode a payload unit, returning any access units that are now ready.
	///
	/// A [DecodeError] means the in-progress access unit was discarded; decoding resumes with the next call.
	pub fn decode(&mut self, unit: PayloadUnit) -> Result<Vec<AccessUnit>, DecodeError> {
		let mut assembled = Vec::new();
		let mut result = Ok(());

		for (unit, timestamp) in self.gate.admit(unit)? {
			if let Err(err) = self.inner.push(unit, timestamp, &mut assembled) {
				result = result.and(Err(err));
			}
		}

		for au in assembled {
			self.reorder.push(au, &mut self.ready);
		}

		result?;
		Ok(std::mem::take(&mut self.ready))
	}

	/// Drain everything buffered, at the end of the stream.
	pub fn flush(&mut self) -> Vec<AccessUnit> {
		self.gate.clear();

		let mut assembled = Vec::new();
		self.inner.finish(&mut assembled);

		for au in assembled {
			self.reorder.push(au, &mut self.ready);
		}
		self.reorder.flush(&mut self.ready);

		std::mem::take(&mut self.ready)
	}
}

/// Holds payload units until their timestamp is known.
///
/// Once any unit carries a timestamp, it becomes the anchor: held and later untimed units are
/// timestamped by their RTP timestamp distance from it.
pub struct TimestampGate {
	anchor: Option<(u32, Timestamp)>,
	pending: VecDeque<PayloadUnit>,
	limit: usize,
}

impl TimestampGate {
	pub fn new(limit: usize) -> Self {
		Self {
			anchor: None,
			pending: VecDeque::new(),
			limit,
		}
	}

	/// Returns the units (in arrival order) that can now be decoded.
	pub fn admit(&mut self, unit: PayloadUnit) -> Result<Vec<(PayloadUnit, Timestamp)>, DecodeError> {
		if let Some(timestamp) = unit.timestamp {
			self.anchor = Some((unit.rtp_timestamp, timestamp));
		}

		let Some(anchor) = self.anchor else {
			if self.pending.len() >= self.limit.max(1) {
				if let Some(dropped) = self.pending.pop_front() {
					tracing::warn!(track = %dropped.track, sequence = dropped.sequence, "no timestamp available, dropping payload");
				}
			}
			self.pending.push_back(unit);
			return Ok(Vec::new());
		};

		let mut ready = Vec::with_capacity(self.pending.len() + 1);
		for unit in self.pending.drain(..).chain(std::iter::once(unit)) {
			let timestamp = match unit.timestamp {
				Some(timestamp) => timestamp,
				None => derive(anchor, unit.rtp_timestamp)?,
			};
			ready.push((unit, timestamp));
		}

		Ok(ready)
	}

	pub fn pending(&self) -> usize {
		self.pending.len()
	}

	pub fn clear(&mut self) {
		if !self.pending.is_empty() {
			tracing::warn!(count = self.pending.len(), "dropping payloads that never got a timestamp");
			self.pending.clear();
		}
	}
}

fn derive((rtp, timestamp): (u32, Timestamp), rtp_timestamp: u32) -> Result<Timestamp, DecodeError> {
	// RTP timestamps wrap; the signed distance is correct as long as units are within 2^31 ticks.
	let delta = rtp_timestamp.wrapping_sub(rtp) as i32;
	Ok(timestamp.checked_add_ticks(delta as i64)?)
}

/// A bounded reorder buffer, emitting access units in non-decreasing timestamp order.
///
/// A depth of 0 emits immediately. Units older than the last emitted unit are stale and dropped.
pub struct Reorder {
	depth: usize,
	buffer: VecDeque<AccessUnit>,
	last: Option<Timestamp>,
}

impl Reorder {
	pub fn new(depth: usize) -> Self {
		Self {
			depth,
			buffer: VecDeque::with_capacity(depth + 1),
			last: None,
		}
	}

	pub fn push(&mut self, au: AccessUnit, out: &mut Vec<AccessUnit>) {
		if self.last.is_some_and(|last| au.timestamp < last) {
			tracing::debug!(timestamp = ?au.timestamp, last = ?self.last, "dropping stale access unit");
			return;
		}

		// Insert after any equal timestamps, so ties keep their arrival order.
		let index = self.buffer.partition_point(|other| other.timestamp <= au.timestamp);
		self.buffer.insert(index, au);

		while self.buffer.len() > self.depth {
			match self.buffer.pop_front() {
				Some(au) => self.emit(au, out),
				None => break,
			}
		}
	}

	pub fn flush(&mut self, out: &mut Vec<AccessUnit>) {
		while let Some(au) = self.buffer.pop_front() {
			self.emit(au, out);
		}
	}

	fn emit(&mut self, au: AccessUnit, out: &mut Vec<AccessUnit>) {
		self.last = Some(au.timestamp);
		out.push(au);
	}
}
