#![forbid(unsafe_code)]

//! Outgoing frame model.
//!
//! Only what the framer needs: the control-frame variants it special-cases,
//! the STREAM frame with its removable length field, and the wire lengths.
//! Encoding and decoding stay with the transport's wire module.

use bytes::Bytes;
use weir_core::{StreamId, Version};

/// Encoded length of a QUIC variable-length integer.
#[must_use]
pub fn varint_len(value: u64) -> usize {
    if value < 1 << 6 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 30 {
        4
    } else {
        8
    }
}

/// PATH_RESPONSE carries the 8-byte challenge payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResponse {
    pub data: [u8; 8],
}

impl PathResponse {
    /// On-wire length: type byte plus payload.
    #[must_use]
    pub fn length(&self, _version: Version) -> usize {
        1 + self.data.len()
    }
}

/// STREAM frame ready for packing.
///
/// `data_len_present` mirrors the LEN bit: the framer clears it on the
/// last frame of a packet, which lets that frame extend to the packet
/// boundary without an explicit length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub offset: u64,
    pub data: Bytes,
    pub fin: bool,
    pub data_len_present: bool,
}

impl StreamFrame {
    #[must_use]
    pub fn length(&self, _version: Version) -> usize {
        let mut len = 1 + varint_len(self.stream_id.0);
        if self.offset > 0 {
            len += varint_len(self.offset);
        }
        if self.data_len_present {
            len += varint_len(self.data.len() as u64);
        }
        len + self.data.len()
    }
}

/// Control frames the framer queues and drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping,
    MaxData { maximum: u64 },
    MaxStreamData { stream_id: StreamId, maximum: u64 },
    MaxStreams { bidirectional: bool, maximum: u64 },
    DataBlocked { limit: u64 },
    StreamDataBlocked { stream_id: StreamId, limit: u64 },
    StreamsBlocked { bidirectional: bool, limit: u64 },
    NewToken { token: Bytes },
    PathChallenge { data: [u8; 8] },
    PathResponse(PathResponse),
    HandshakeDone,
}

impl Frame {
    #[must_use]
    pub fn length(&self, version: Version) -> usize {
        match self {
            Frame::Ping | Frame::HandshakeDone => 1,
            Frame::MaxData { maximum } | Frame::DataBlocked { limit: maximum } => {
                1 + varint_len(*maximum)
            }
            Frame::MaxStreamData { stream_id, maximum }
            | Frame::StreamDataBlocked { stream_id, limit: maximum } => {
                1 + varint_len(stream_id.0) + varint_len(*maximum)
            }
            Frame::MaxStreams { maximum, .. } | Frame::StreamsBlocked { limit: maximum, .. } => {
                1 + varint_len(*maximum)
            }
            Frame::NewToken { token } => 1 + varint_len(token.len() as u64) + token.len(),
            Frame::PathChallenge { data } => 1 + data.len(),
            Frame::PathResponse(pr) => pr.length(version),
        }
    }
}
