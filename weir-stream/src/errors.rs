#![forbid(unsafe_code)]

use thiserror::Error;
use weir_core::StreamId;

/// Result type for framer operations.
pub type FramerResult<T> = Result<T, FramerError>;

/// Fatal framer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramerError {
    /// A flow-control credit frame was queued while 0-RTT was rejected;
    /// these must never be sent in 0-RTT packets.
    #[error("didn't expect {0} frame to be sent in 0-RTT")]
    ProtocolViolation(&'static str),
}

/// The stream layer no longer knows the stream. Recovered locally by the
/// framer: the stream is dropped from the active set and packing moves on.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stream {0} is gone")]
pub struct StreamGone(pub StreamId);
