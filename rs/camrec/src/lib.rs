//! # camrec: record a live RTSP camera into MPEG-TS files
//!
//! `camrec` pulls the H.264 video and AAC audio tracks of an IP camera over RTSP,
//! depacketizes the RTP payloads back into access units, and multiplexes them into
//! a transport stream on disk. A reconnect controller restarts the whole pipeline
//! whenever the connection drops.
//!
//! ## Overview
//!
//! - **Track**: Resolve the video/audio tracks out of a session description.
//! - **Depacketize**: Turn RTP payloads into timestamped access units, one decoder per track.
//! - **Container**: A minimal MPEG-TS writer and reader.
//! - **Mux**: A shared, thread-safe muxer that interleaves both tracks into one file.
//! - **Session**: Drive a single connection from DESCRIBE to teardown.
//! - **Reconnect**: Retry transient failures according to a [RetryPolicy].
//!
mod error;
mod timestamp;

pub mod codec;
pub mod container;
pub mod depacketize;
pub mod mux;
pub mod observe;
pub mod reconnect;
pub mod rtsp;
pub mod session;
pub mod track;

#[cfg(test)]
mod mock;

pub use error::*;
pub use mux::{Muxer, MuxStats, OutputConfig};
pub use observe::{Observer, TracingObserver};
pub use reconnect::{Reconnect, RetryPolicy};
pub use rtsp::{RtspConnector, TransportKind};
pub use session::{Session, SessionConfig, SessionSummary, State};
pub use timestamp::*;
pub use track::*;

// export the retina version in use
pub use retina;
