use buf_list::BufList;
use bytes::{Buf, Bytes};

use super::{AccessUnit, Depacketize, MAX_ACCESS_UNIT_NALS, MAX_ACCESS_UNIT_SIZE, PayloadUnit};
use crate::codec::is_keyframe;
use crate::{DecodeError, MediaKind, Timestamp};

/// An RFC 6184 depacketizer, supporting single NAL unit, STAP-A, and FU-A packets.
///
/// An access unit ends on the RTP marker bit or when the RTP timestamp changes.
#[derive(Default)]
pub struct H264 {
	// The access unit being built.
	nals: Vec<Bytes>,
	size: usize,
	timestamp: Option<Timestamp>,

	// A fragmented NAL unit being built.
	fragment: Option<BufList>,

	last_sequence: Option<u16>,
}

impl H264 {
	pub fn new() -> Self {
		Self::default()
	}

	fn reset(&mut self) {
		self.nals.clear();
		self.size = 0;
		self.timestamp = None;
		self.fragment = None;
	}

	fn in_progress(&self) -> bool {
		!self.nals.is_empty() || self.fragment.is_some()
	}

	fn emit(&mut self, out: &mut Vec<AccessUnit>) {
		let Some(timestamp) = self.timestamp.take() else {
			return;
		};

		let nals = std::mem::take(&mut self.nals);
		self.size = 0;

		if nals.is_empty() {
			return;
		}

		out.push(AccessUnit {
			timestamp,
			keyframe: is_keyframe(&nals),
			data: nals,
		});
	}

	fn add_nal(&mut self, nal: Bytes) -> Result<(), DecodeError> {
		if nal.is_empty() {
			return Err(DecodeError::Empty);
		}

		if nal[0] & 0x80 != 0 {
			return Err(DecodeError::ForbiddenBit);
		}

		self.size += nal.len();
		if self.size > MAX_ACCESS_UNIT_SIZE {
			return Err(DecodeError::TooLarge("access unit"));
		}

		if self.nals.len() >= MAX_ACCESS_UNIT_NALS {
			return Err(DecodeError::TooLarge("NAL count"));
		}

		self.nals.push(nal);
		Ok(())
	}

	fn depacketize(&mut self, mut payload: Bytes) -> Result<(), DecodeError> {
		let header = *payload.first().ok_or(DecodeError::Empty)?;
		if header & 0x80 != 0 {
			return Err(DecodeError::ForbiddenBit);
		}

		let kind = header & 0x1F;
		match kind {
			1..=23 => {
				self.check_no_fragment()?;
				self.add_nal(payload)?;
			}
			24 => {
				// STAP-A
				self.check_no_fragment()?;

				payload.advance(1);
				if payload.is_empty() {
					return Err(DecodeError::Truncated("STAP-A"));
				}

				while !payload.is_empty() {
					if payload.len() < 2 {
						return Err(DecodeError::Truncated("STAP-A"));
					}

					let size = payload.get_u16() as usize;
					if size == 0 || size > payload.len() {
						return Err(DecodeError::Truncated("STAP-A"));
					}

					self.add_nal(payload.split_to(size))?;
				}
			}
			28 => self.fragment(payload)?,
			// STAP-B, MTAP16, MTAP24, FU-B, and reserved types.
			kind => return Err(DecodeError::Unsupported(kind)),
		}

		Ok(())
	}

	fn fragment(&mut self, payload: Bytes) -> Result<(), DecodeError> {
		if payload.len() < 3 {
			return Err(DecodeError::Truncated("FU-A"));
		}

		let indicator = payload[0];
		let header = payload[1];
		let start = header & 0x80 != 0;
		let end = header & 0x40 != 0;
		let data = payload.slice(2..);

		if start {
			self.check_no_fragment()?;

			let nal_header = (indicator & 0xE0) | (header & 0x1F);
			let mut fragment = BufList::new();
			fragment.push_chunk(Bytes::copy_from_slice(&[nal_header]));
			fragment.push_chunk(data);
			self.fragment = Some(fragment);
		} else {
			let Some(fragment) = self.fragment.as_mut() else {
				// We joined mid-NAL, wait for the next start.
				tracing::trace!("skipping FU-A continuation without a start");
				return Ok(());
			};

			fragment.push_chunk(data);
		}

		let size = self.fragment.as_ref().map(|fragment| fragment.remaining()).unwrap_or_default();
		if self.size + size > MAX_ACCESS_UNIT_SIZE {
			return Err(DecodeError::TooLarge("access unit"));
		}

		if end {
			if let Some(mut fragment) = self.fragment.take() {
				let nal = fragment.copy_to_bytes(fragment.remaining());
				self.add_nal(nal)?;
			}
		}

		Ok(())
	}

	// A new NAL started before the fragmented one ended.
	fn check_no_fragment(&self) -> Result<(), DecodeError> {
		match self.fragment {
			Some(_) => Err(DecodeError::Truncated("FU-A")),
			None => Ok(()),
		}
	}

	fn check_continuity(&mut self, unit: &PayloadUnit) -> Result<(), DecodeError> {
		let expected = self.last_sequence.map(|last| last.wrapping_add(1));
		self.last_sequence = Some(unit.sequence);

		if !self.in_progress() {
			return Ok(());
		}

		if unit.lost > 0 {
			return Err(DecodeError::Lost(unit.lost));
		}

		match expected {
			Some(expected) if expected != unit.sequence => Err(DecodeError::SequenceGap {
				expected,
				actual: unit.sequence,
			}),
			_ => Ok(()),
		}
	}
}

impl Depacketize for H264 {
	const KIND: MediaKind = MediaKind::Video;

	fn push(&mut self, unit: PayloadUnit, timestamp: Timestamp, out: &mut Vec<AccessUnit>) -> Result<(), DecodeError> {
		if let Err(err) = self.check_continuity(&unit) {
			self.reset();
			return Err(err);
		}

		if self.timestamp.is_some_and(|current| current != timestamp) {
			// The marker bit was lost; the timestamp change is the boundary.
			if self.fragment.is_some() {
				self.reset();
				return Err(DecodeError::Truncated("FU-A"));
			}

			self.emit(out);
		}

		self.timestamp = Some(timestamp);

		if let Err(err) = self.depacketize(unit.payload) {
			self.reset();
			return Err(err);
		}

		if unit.marker {
			if self.fragment.is_some() {
				self.reset();
				return Err(DecodeError::Truncated("FU-A"));
			}

			self.emit(out);
		}

		Ok(())
	}

	fn finish(&mut self, out: &mut Vec<AccessUnit>) {
		if self.fragment.is_some() {
			tracing::debug!("discarding incomplete fragmented NAL");
			self.reset();
			return;
		}

		self.emit(out);
	}
}
