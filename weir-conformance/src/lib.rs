#![forbid(unsafe_code)]

//! Test doubles shared by the conformance suites: a scripted stream map
//! standing in for the connection's stream layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use weir_core::{StreamId, Version};
use weir_stream::{varint_len, SendStream, StreamFrame, StreamGone, StreamGetter};

/// A send stream with a fixed number of pending bytes. Frames are filled
/// with zeroes; offsets advance as data is consumed.
pub struct ScriptedStream {
    id: StreamId,
    state: Mutex<ScriptedState>,
}

struct ScriptedState {
    pending: usize,
    offset: u64,
}

impl ScriptedStream {
    #[must_use]
    pub fn new(id: StreamId, pending: usize) -> Self {
        Self { id, state: Mutex::new(ScriptedState { pending, offset: 0 }) }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).pending
    }
}

impl SendStream for ScriptedStream {
    fn pop_stream_frame(&self, max_len: usize, _version: Version) -> (Option<StreamFrame>, bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let base = 1
            + varint_len(self.id.0)
            + if state.offset > 0 { varint_len(state.offset) } else { 0 };
        if state.pending == 0 || max_len <= base {
            return (None, state.pending > 0);
        }

        // Largest payload whose framed length (with the length field
        // present) still fits max_len.
        let mut take = state.pending.min(max_len - base);
        while take > 0 && base + varint_len(take as u64) + take > max_len {
            take -= 1;
        }
        if take == 0 {
            return (None, state.pending > 0);
        }

        let frame = StreamFrame {
            stream_id: self.id,
            offset: state.offset,
            data: Bytes::from(vec![0u8; take]),
            fin: state.pending == take,
            data_len_present: true,
        };
        state.pending -= take;
        state.offset += take as u64;
        (Some(frame), state.pending > 0)
    }
}

/// Stream map for the framer under test.
#[derive(Default)]
pub struct ScriptedStreams {
    streams: Mutex<HashMap<StreamId, Arc<ScriptedStream>>>,
}

impl ScriptedStreams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream with `pending` bytes ready to send.
    pub fn insert(&self, id: StreamId, pending: usize) -> Arc<ScriptedStream> {
        let stream = Arc::new(ScriptedStream::new(id, pending));
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&stream));
        stream
    }

    /// Forget a stream, so lookups report it gone.
    pub fn remove(&self, id: StreamId) {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }
}

impl StreamGetter for ScriptedStreams {
    fn get_or_open_send_stream(
        &self,
        id: StreamId,
    ) -> Result<Option<Arc<dyn SendStream>>, StreamGone> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(streams.get(&id).map(|s| Arc::clone(s) as Arc<dyn SendStream>))
    }
}
