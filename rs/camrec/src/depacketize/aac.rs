use buf_list::BufList;
use bytes::{Buf, Bytes};

use super::{AccessUnit, Depacketize, MAX_ACCESS_UNIT_SIZE, PayloadUnit};
use crate::codec::{BitReader, SAMPLES_PER_FRAME};
use crate::{DecodeError, MediaKind, Timestamp};

/// The AU-header layout of an RFC 3640 stream.
///
/// The defaults are the fixed values of the AAC-hbr mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacHbr {
	pub size_length: u8,
	pub index_length: u8,
	pub index_delta_length: u8,
}

impl Default for AacHbr {
	fn default() -> Self {
		Self {
			size_length: 13,
			index_length: 3,
			index_delta_length: 3,
		}
	}
}

struct Fragment {
	timestamp: Timestamp,
	size: usize,
	data: BufList,
}

/// An RFC 3640 (mpeg4-generic) depacketizer for AAC.
///
/// Each packet carries one or more complete AUs, or a fragment of a single AU.
/// The i-th AU in a packet is timestamped 1024 samples after the previous one.
pub struct Aac {
	hbr: AacHbr,
	fragment: Option<Fragment>,
	last_sequence: Option<u16>,
}

impl Aac {
	pub fn new(hbr: AacHbr) -> Self {
		Self {
			hbr,
			fragment: None,
			last_sequence: None,
		}
	}

	fn check_continuity(&mut self, unit: &PayloadUnit) -> Result<(), DecodeError> {
		let expected = self.last_sequence.map(|last| last.wrapping_add(1));
		self.last_sequence = Some(unit.sequence);

		if self.fragment.is_none() {
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

	/// Parse the AU-header section, returning the AU sizes and the remaining data.
	fn headers(&self, mut payload: Bytes) -> Result<(Vec<usize>, Bytes), DecodeError> {
		if payload.len() < 2 {
			return Err(DecodeError::AuHeader("missing AU-headers-length"));
		}

		let bits = payload.get_u16() as usize;
		let bytes = bits.div_ceil(8);
		if bits == 0 {
			return Err(DecodeError::AuHeader("no AU headers"));
		}
		if bytes > payload.len() {
			return Err(DecodeError::AuHeader("truncated AU headers"));
		}

		let section = payload.split_to(bytes);
		let mut reader = BitReader::new(&section);
		let mut consumed = 0;
		let mut sizes = Vec::new();

		while consumed < bits {
			let index_length = match sizes.is_empty() {
				true => self.hbr.index_length,
				false => self.hbr.index_delta_length,
			};

			let size = reader
				.read(self.hbr.size_length)
				.ok_or(DecodeError::AuHeader("truncated AU header"))?;
			let index = reader
				.read(index_length)
				.ok_or(DecodeError::AuHeader("truncated AU header"))?;

			// Only the first header may carry an index; anything else is interleaving.
			if !sizes.is_empty() && index != 0 {
				return Err(DecodeError::AuHeader("interleaved AUs are not supported"));
			}

			consumed += (self.hbr.size_length + index_length) as usize;
			sizes.push(size as usize);
		}

		if consumed != bits {
			return Err(DecodeError::AuHeader("AU-headers-length doesn't match the header size"));
		}

		Ok((sizes, payload))
	}

	fn depacketize(
		&mut self,
		payload: Bytes,
		timestamp: Timestamp,
		marker: bool,
		out: &mut Vec<AccessUnit>,
	) -> Result<(), DecodeError> {
		let (sizes, mut data) = self.headers(payload)?;

		if self.fragment.is_some() {
			return self.continue_fragment(&sizes, data, timestamp, marker, out);
		}

		if sizes.contains(&0) {
			return Err(DecodeError::Empty);
		}

		let total: usize = sizes.iter().sum();

		// A single AU that doesn't fit in the packet.
		if sizes.len() == 1 && total > data.len() {
			if marker {
				return Err(DecodeError::Truncated("AAC fragment"));
			}
			if total > MAX_ACCESS_UNIT_SIZE {
				return Err(DecodeError::TooLarge("AAC frame"));
			}

			let mut fragment = BufList::new();
			fragment.push_chunk(data);
			self.fragment = Some(Fragment {
				timestamp,
				size: total,
				data: fragment,
			});

			return Ok(());
		}

		if total != data.len() {
			return Err(DecodeError::AuHeader("AU sizes don't match the payload"));
		}

		let mut units = Vec::with_capacity(sizes.len());
		for (i, size) in sizes.into_iter().enumerate() {
			units.push(AccessUnit {
				timestamp: timestamp.checked_add_ticks(i as i64 * SAMPLES_PER_FRAME)?,
				keyframe: true,
				data: vec![data.split_to(size)],
			});
		}

		out.extend(units);
		Ok(())
	}

	fn continue_fragment(
		&mut self,
		sizes: &[usize],
		data: Bytes,
		timestamp: Timestamp,
		marker: bool,
		out: &mut Vec<AccessUnit>,
	) -> Result<(), DecodeError> {
		let Some(fragment) = self.fragment.as_mut() else {
			return Ok(());
		};

		if sizes.len() != 1 || sizes[0] != fragment.size || timestamp != fragment.timestamp {
			return Err(DecodeError::Truncated("AAC fragment"));
		}

		fragment.data.push_chunk(data);

		let received = fragment.data.remaining();
		if received > fragment.size {
			return Err(DecodeError::AuHeader("fragment exceeds the AU size"));
		}

		if received == fragment.size {
			if let Some(mut fragment) = self.fragment.take() {
				out.push(AccessUnit {
					timestamp: fragment.timestamp,
					keyframe: true,
					data: vec![fragment.data.copy_to_bytes(fragment.size)],
				});
			}
		} else if marker {
			return Err(DecodeError::Truncated("AAC fragment"));
		}

		Ok(())
	}
}

impl Depacketize for Aac {
	const KIND: MediaKind = MediaKind::Audio;

	fn push(&mut self, unit: PayloadUnit, timestamp: Timestamp, out: &mut Vec<AccessUnit>) -> Result<(), DecodeError> {
		let result = match self.check_continuity(&unit) {
			Ok(()) => self.depacketize(unit.payload, timestamp, unit.marker, out),
			Err(err) => Err(err),
		};

		if result.is_err() {
			self.fragment = None;
		}

		result
	}

	fn finish(&mut self, _out: &mut Vec<AccessUnit>) {
		if self.fragment.take().is_some() {
			tracing::debug!("discarding incomplete AAC fragment");
		}
	}
}
