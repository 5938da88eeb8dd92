use super::BitReader;
use crate::DecodeError;

/// The sampling frequencies addressable by a 4-bit index (ISO 14496-3 Table 1.18).
pub const SAMPLE_RATES: [u32; 13] = [
	96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// The number of PCM samples per AAC frame.
pub const SAMPLES_PER_FRAME: i64 = 1024;

/// The size of an ADTS header without CRC.
pub const ADTS_HEADER_SIZE: usize = 7;

/// The largest frame (header included) an ADTS header can describe.
pub const ADTS_MAX_FRAME: usize = (1 << 13) - 1;

/// The parts of an AudioSpecificConfig needed to write ADTS headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacConfig {
	/// The audio object type, ex. 2 for AAC-LC.
	pub profile: u8,
	pub sample_rate: u32,
	pub channels: u8,
}

impl AacConfig {
	/// Parse an AudioSpecificConfig (ISO 14496-3 1.6.2.1).
	pub fn parse(asc: &[u8]) -> Result<Self, DecodeError> {
		let truncated = DecodeError::Truncated("AudioSpecificConfig");
		let mut bits = BitReader::new(asc);

		let mut profile = bits.read(5).ok_or(truncated.clone())?;
		if profile == 31 {
			profile = 32 + bits.read(6).ok_or(truncated.clone())?;
		}

		let index = bits.read(4).ok_or(truncated.clone())?;
		let sample_rate = match index {
			15 => bits.read(24).ok_or(truncated.clone())?,
			index => *SAMPLE_RATES
				.get(index as usize)
				.ok_or(DecodeError::Config("reserved sampling frequency index"))?,
		};

		let channels = bits.read(4).ok_or(truncated)?;

		let config = Self {
			profile: profile as u8,
			sample_rate,
			channels: channels as u8,
		};

		// ADTS can only signal the first four object types and the indexed rates.
		if !(1..=4).contains(&config.profile) {
			return Err(DecodeError::Config("object type can't be carried in ADTS"));
		}
		config.frequency_index()?;

		Ok(config)
	}

	pub fn frequency_index(&self) -> Result<u8, DecodeError> {
		SAMPLE_RATES
			.iter()
			.position(|&rate| rate == self.sample_rate)
			.map(|index| index as u8)
			.ok_or(DecodeError::Config("sample rate has no frequency index"))
	}

	/// Build the 7 byte ADTS header for a raw frame of `payload` bytes.
	pub fn adts_header(&self, payload: usize) -> Result<[u8; ADTS_HEADER_SIZE], DecodeError> {
		let size = payload + ADTS_HEADER_SIZE;
		if size > ADTS_MAX_FRAME {
			return Err(DecodeError::TooLarge("ADTS frame"));
		}

		let profile = self.profile.saturating_sub(1) & 0x03;
		let index = self.frequency_index()?;
		let channels = self.channels & 0x07;

		Ok([
			0xFF,
			0xF1, // MPEG-4, layer 0, no CRC
			(profile << 6) | (index << 2) | (channels >> 2),
			((channels & 0x03) << 6) | ((size >> 11) as u8 & 0x03),
			(size >> 3) as u8,
			((size as u8 & 0x07) << 5) | 0x1F,
			0xFC, // buffer fullness 0x7FF (VBR), one raw data block
		])
	}
}

/// A parsed ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
	pub config: AacConfig,
	/// The size of the header, 7 or 9 bytes.
	pub header_size: usize,
	/// The size of the frame including the header.
	pub frame_size: usize,
}

impl AdtsHeader {
	pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
		if buf.len() < ADTS_HEADER_SIZE {
			return Err(DecodeError::Truncated("ADTS header"));
		}

		if buf[0] != 0xFF || buf[1] & 0xF0 != 0xF0 {
			return Err(DecodeError::Config("missing ADTS sync word"));
		}

		let protection_absent = buf[1] & 0x01 == 1;
		let profile = (buf[2] >> 6) + 1;
		let index = (buf[2] >> 2) & 0x0F;
		let channels = ((buf[2] & 0x01) << 2) | (buf[3] >> 6);
		let frame_size = ((buf[3] as usize & 0x03) << 11) | ((buf[4] as usize) << 3) | (buf[5] as usize >> 5);

		let sample_rate = *SAMPLE_RATES
			.get(index as usize)
			.ok_or(DecodeError::Config("reserved sampling frequency index"))?;

		let header_size = if protection_absent { 7 } else { 9 };
		if frame_size < header_size {
			return Err(DecodeError::Truncated("ADTS frame"));
		}

		Ok(Self {
			config: AacConfig {
				profile,
				sample_rate,
				channels,
			},
			header_size,
			frame_size,
		})
	}
}
