//! A minimal MPEG-TS (ISO 13818-1) writer, and a reader on top of `mpeg2ts-reader`.
//!
//! The layout is fixed: one program, H.264 video on [VIDEO_PID] and ADTS AAC on [AUDIO_PID],
//! with the PCR carried on the video PID.

mod reader;
mod writer;

pub use reader::{Pes, ReadError, TsReader};
pub use writer::*;

use crate::MediaKind;

pub const PACKET_SIZE: usize = 188;
pub const SYNC_BYTE: u8 = 0x47;

pub const PAT_PID: u16 = 0x0000;
pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const AUDIO_PID: u16 = 0x0101;

pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_ADTS: u8 = 0x0F;

pub const PROGRAM_NUMBER: u16 = 1;
pub const TRANSPORT_STREAM_ID: u16 = 1;

/// The largest value of a 33-bit PTS/PCR base.
pub const MAX_PTS: u64 = (1 << 33) - 1;

/// The PID, PES stream id, and PMT stream type used for each kind of media.
pub fn stream(kind: MediaKind) -> (u16, u8, u8) {
	match kind {
		MediaKind::Video => (VIDEO_PID, 0xE0, STREAM_TYPE_H264),
		MediaKind::Audio => (AUDIO_PID, 0xC0, STREAM_TYPE_ADTS),
	}
}

/// CRC-32/MPEG-2, as used by PSI sections.
///
/// Running it over a section including its trailing CRC yields 0.
pub fn crc32(data: &[u8]) -> u32 {
	let mut crc = 0xFFFF_FFFFu32;
	for &byte in data {
		crc ^= (byte as u32) << 24;
		for _ in 0..8 {
			crc = match crc & 0x8000_0000 {
				0 => crc << 1,
				_ => (crc << 1) ^ 0x04C1_1DB7,
			};
		}
	}
	crc
}
