use bytes::{BufMut, Bytes, BytesMut};
use mp4_atom::Atom;

use crate::DecodeError;

/// The 4 byte Annex B start code.
///
/// NOTE: This is ref-counted and static, so it's extremely cheap to clone.
pub const START_CODE: Bytes = Bytes::from_static(&[0, 0, 0, 1]);

/// An access unit delimiter NAL, primary_pic_type = 7 (any slice type).
const AUD: Bytes = Bytes::from_static(&[0x09, 0xF0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum NalType {
	NonIdr = 1,
	PartitionA = 2,
	PartitionB = 3,
	PartitionC = 4,
	Idr = 5,
	Sei = 6,
	Sps = 7,
	Pps = 8,
	Aud = 9,
	EndOfSequence = 10,
	EndOfStream = 11,
	Filler = 12,
	SpsExt = 13,
	Prefix = 14,
	SubsetSps = 15,
	// 16 -> 18 reserved
	AuxiliarySlice = 19,
	SliceExtension = 20,
	// 21 -> 23 reserved
	// RFC 6184 packetization types
	StapA = 24,
	StapB = 25,
	Mtap16 = 26,
	Mtap24 = 27,
	FuA = 28,
	FuB = 29,
} // ITU H.264 Table 7-1, RFC 6184 Table 1

impl NalType {
	/// Parse the type out of the first byte of a NAL unit.
	pub fn from_header(header: u8) -> Option<Self> {
		Self::try_from(header & 0x1F).ok()
	}
}

/// The parameter sets needed to initialize an H.264 decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct H264Params {
	pub sps: Option<Bytes>,
	pub pps: Option<Bytes>,
}

impl H264Params {
	/// Parse the first SPS and PPS out of an AVCDecoderConfigurationRecord (ISO 14496-15 5.3.3.1).
	pub fn from_avcc(avcc: &[u8]) -> Result<Self, DecodeError> {
		if avcc.first().is_some_and(|&version| version != 1) {
			return Err(DecodeError::Config("unknown avcC version"));
		}

		let record = mp4_atom::Avcc::decode_body(&mut &avcc[..]).map_err(|err| {
			tracing::debug!(%err, "failed to decode avcC");
			DecodeError::Truncated("AVCDecoderConfigurationRecord")
		})?;

		Ok(Self {
			sps: record.sequence_parameter_sets.into_iter().next().map(Bytes::from),
			pps: record.picture_parameter_sets.into_iter().next().map(Bytes::from),
		})
	}

	pub fn is_complete(&self) -> bool {
		self.sps.is_some() && self.pps.is_some()
	}
}

/// Returns true if any NAL in the access unit is an IDR slice.
pub fn is_keyframe(nals: &[Bytes]) -> bool {
	nals.iter()
		.any(|nal| nal.first().and_then(|h| NalType::from_header(*h)) == Some(NalType::Idr))
}

/// Serialize an access unit into Annex B format, as required by MPEG-TS.
///
/// An access unit delimiter is inserted if missing, and the parameter sets are prepended
/// to keyframes that don't carry them in-band.
pub fn annexb(nals: &[Bytes], params: &H264Params, keyframe: bool) -> Bytes {
	let types: Vec<Option<NalType>> = nals
		.iter()
		.map(|nal| nal.first().and_then(|h| NalType::from_header(*h)))
		.collect();

	let mut out = BytesMut::with_capacity(nals.iter().map(|nal| nal.len() + 4).sum::<usize>() + 64);

	if types.first() != Some(&Some(NalType::Aud)) {
		out.put_slice(&START_CODE);
		out.put_slice(&AUD);
	}

	if keyframe {
		let missing = [(NalType::Sps, &params.sps), (NalType::Pps, &params.pps)];
		for (kind, nal) in missing {
			match nal {
				Some(nal) if !types.contains(&Some(kind)) => {
					out.put_slice(&START_CODE);
					out.put_slice(nal);
				}
				_ => {}
			}
		}
	}

	for nal in nals {
		out.put_slice(&START_CODE);
		out.put_slice(nal);
	}

	out.freeze()
}

/// Split an Annex B byte stream into NAL units, accepting both 3 and 4 byte start codes.
pub fn split_annexb(buf: &Bytes) -> Vec<Bytes> {
	let mut nals = Vec::new();
	let mut start = None;
	let mut i = 0;

	while i + 3 <= buf.len() {
		if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
			if let Some(start) = start {
				nals.push(trim_trailing_zeros(buf.slice(start..i)));
			}
			i += 3;
			start = Some(i);
		} else {
			i += 1;
		}
	}

	if let Some(start) = start.filter(|&start| start < buf.len()) {
		nals.push(buf.slice(start..));
	}

	nals.retain(|nal| !nal.is_empty());
	nals
}

// The leading zero of a 4 byte start code belongs to the previous NAL's trailing bytes.
fn trim_trailing_zeros(mut nal: Bytes) -> Bytes {
	while nal.last() == Some(&0) {
		nal.truncate(nal.len() - 1);
	}
	nal
}
