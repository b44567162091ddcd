#![forbid(unsafe_code)]

//! Capabilities the framer consumes from the stream layer.

use std::sync::Arc;

use weir_core::{StreamId, Version};

use crate::errors::StreamGone;
use crate::frame::StreamFrame;

/// A send stream that can produce STREAM frames on demand.
pub trait SendStream: Send + Sync {
    /// Pop the next STREAM frame fitting `max_len` on-wire bytes.
    ///
    /// Returns the frame (or `None` if the stream has nothing that fits,
    /// e.g. it was cancelled after declaring data) and whether more data
    /// remains queued after this call.
    fn pop_stream_frame(&self, max_len: usize, version: Version) -> (Option<StreamFrame>, bool);
}

/// Stream lookup capability provided by the connection's stream map.
pub trait StreamGetter: Send + Sync {
    /// `Ok(None)` when the stream completed after it enqueued itself.
    fn get_or_open_send_stream(
        &self,
        id: StreamId,
    ) -> Result<Option<Arc<dyn SendStream>>, StreamGone>;
}
