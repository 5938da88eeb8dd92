//! Codec-level helpers shared by the depacketizers and the muxer.

mod aac;
mod h264;

pub use aac::*;
pub use h264::*;

/// Reads big-endian bit fields, as found in AU headers and AudioSpecificConfig.
pub(crate) struct BitReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> BitReader<'a> {
	pub fn new(data: &'a [u8]) -> Self {
		Self { data, pos: 0 }
	}

	/// The number of unread bits.
	pub fn remaining(&self) -> usize {
		self.data.len() * 8 - self.pos
	}

	/// Read up to 32 bits, or None if there aren't enough left.
	pub fn read(&mut self, bits: u8) -> Option<u32> {
		if bits > 32 || bits as usize > self.remaining() {
			return None;
		}

		let mut value = 0u32;
		for _ in 0..bits {
			let byte = self.data[self.pos / 8];
			let bit = (byte >> (7 - self.pos % 8)) & 1;
			value = (value << 1) | bit as u32;
			self.pos += 1;
		}

		Some(value)
	}
}
