#![forbid(unsafe_code)]

//! Weir outgoing-frame scheduling.
//!
//! [`Framer`] assembles the frame payload of each outbound packet: control
//! frames, at most one path response, and STREAM frames popped from the
//! active streams under a byte budget. Stream selection is priority-aware
//! and gated by the balancer's allowance for non-priority traffic.

pub mod errors;
pub mod frame;
pub mod framer;
pub mod stream;

pub use errors::{FramerError, FramerResult, StreamGone};
pub use frame::{varint_len, Frame, PathResponse, StreamFrame};
pub use framer::{Framer, MAX_PATH_RESPONSES, MIN_STREAM_FRAME_SIZE};
pub use stream::{SendStream, StreamGetter};
