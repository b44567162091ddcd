#![forbid(unsafe_code)]

//! The outgoing frame scheduler.
//!
//! Packs three kinds of payload under a strict byte budget: queued control
//! frames, at most one PATH_RESPONSE per packet, and STREAM frames popped
//! from the active streams. Stream selection prefers priority streams and
//! asks the balancer's gate before packing non-priority ones.
//!
//! Lock order: the stream mutex may be held while taking the control
//! mutex (`handle_0rtt_rejection`); never the reverse.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;
use weir_balancer::Balancer;
use weir_core::{StreamId, Version};

use crate::errors::{FramerError, FramerResult};
use crate::frame::{varint_len, Frame, StreamFrame};
use crate::stream::StreamGetter;

/// Upper bound on queued PATH_RESPONSE frames. High enough to never be
/// hit unless the peer is doing something malicious.
pub const MAX_PATH_RESPONSES: usize = 256;

/// Smallest STREAM frame worth packing; below this the loop stops.
pub const MIN_STREAM_FRAME_SIZE: usize = 128;

struct StreamQueue {
    active: HashSet<StreamId>,
    queue: VecDeque<StreamId>,
}

struct ControlQueue {
    frames: Vec<Frame>,
    path_responses: VecDeque<crate::frame::PathResponse>,
}

pub struct Framer {
    getter: Arc<dyn StreamGetter>,
    balancer: Arc<Balancer>,
    streams: Mutex<StreamQueue>,
    control: Mutex<ControlQueue>,
}

impl Framer {
    #[must_use]
    pub fn new(getter: Arc<dyn StreamGetter>, balancer: Arc<Balancer>) -> Self {
        Self {
            getter,
            balancer,
            streams: Mutex::new(StreamQueue { active: HashSet::new(), queue: VecDeque::new() }),
            control: Mutex::new(ControlQueue {
                frames: Vec::new(),
                path_responses: VecDeque::new(),
            }),
        }
    }

    /// Whether anything is waiting to be packed. Never blocks beyond the
    /// two leaf mutexes.
    #[must_use]
    pub fn has_data(&self) -> bool {
        if !self.streams.lock().unwrap_or_else(PoisonError::into_inner).queue.is_empty() {
            return true;
        }
        let control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        !control.frames.is_empty() || !control.path_responses.is_empty()
    }

    /// Queue a control frame. PATH_RESPONSEs go to their own bounded list;
    /// past the cap they are dropped silently.
    pub fn queue_control(&self, frame: Frame) {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if let Frame::PathResponse(pr) = frame {
            if control.path_responses.len() >= MAX_PATH_RESPONSES {
                return;
            }
            control.path_responses.push_back(pr);
            return;
        }
        control.frames.push(frame);
    }

    /// Declare a stream ready to send. Idempotent; FIFO per caller.
    pub fn add_active_stream(&self, id: StreamId) {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        if streams.active.insert(id) {
            streams.queue.push_back(id);
            self.balancer.debug("framer", &format!("stream {id} activated"));
        }
    }

    /// Append control frames fitting `max_len`, one PATH_RESPONSE first,
    /// then the control stack drained LIFO until a frame does not fit.
    /// Returns the total length added.
    pub fn append_control(&self, frames: &mut Vec<Frame>, max_len: usize, version: Version) -> usize {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        let mut length = 0;

        if let Some(pr) = control.path_responses.front() {
            let frame_len = pr.length(version);
            if frame_len <= max_len {
                frames.push(Frame::PathResponse(*pr));
                length += frame_len;
                control.path_responses.pop_front();
            }
        }

        loop {
            let Some(frame) = control.frames.last() else { break };
            let frame_len = frame.length(version);
            if length + frame_len > max_len {
                // Stop at the first frame that does not fit; skipping ahead
                // would reorder the survivors.
                break;
            }
            if let Some(frame) = control.frames.pop() {
                frames.push(frame);
                length += frame_len;
            }
        }
        length
    }

    /// Append STREAM frames fitting `max_len`, rotating through the active
    /// streams with priority preference. Returns the total length added.
    pub fn append_stream(
        &self,
        frames: &mut Vec<StreamFrame>,
        max_len: usize,
        version: Version,
    ) -> usize {
        let start = frames.len();
        let mut length = 0usize;
        {
            let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
            let snapshot = streams.queue.len();
            for _ in 0..snapshot {
                if MIN_STREAM_FRAME_SIZE + length > max_len {
                    break;
                }
                let remaining = max_len - length;
                let Some(id) = self.pop_queued(&mut streams) else { break };

                if !self.balancer.is_priority(id) && !self.balancer.can_send_uni(remaining) {
                    // Other non-priority streams will not fare better this
                    // tick; requeue and give up on the packet.
                    streams.queue.push_back(id);
                    break;
                }

                let stream = match self.getter.get_or_open_send_stream(id) {
                    Ok(Some(stream)) => stream,
                    // The stream can complete after it said it had data.
                    Ok(None) | Err(_) => {
                        streams.active.remove(&id);
                        continue;
                    }
                };

                // The last STREAM frame drops its length field later, so
                // pretend to have room for one more varint when popping.
                let budget = remaining + varint_len(remaining as u64);
                let (frame, has_more_data) = stream.pop_stream_frame(budget, version);
                if has_more_data {
                    self.balancer.debug("framer", "has more data");
                    streams.queue.push_back(id);
                } else {
                    streams.active.remove(&id);
                }
                let Some(frame) = frame else { continue };
                let frame_len = frame.length(version);
                frames.push(frame);
                length += frame_len;
                self.balancer.register_sent(frame_len, id);
            }
        }

        if frames.len() > start {
            if let Some(last) = frames.last_mut() {
                let before = last.length(version);
                last.data_len_present = false;
                length -= before - last.length(version);
            }
        }
        self.balancer.debug("framer:append_stream", &format!("length: {length}"));
        length
    }

    /// Priority-aware pop: scan one rotation of the queue for a priority
    /// stream; fall back to the oldest entry. The caller either requeues
    /// the ID or removes it from the active set.
    fn pop_queued(&self, streams: &mut StreamQueue) -> Option<StreamId> {
        self.balancer.debug("stream_queue_pop", "new scan");
        trace!(queue_len = streams.queue.len(), "stream queue scan");
        for _ in 0..streams.queue.len() {
            let id = streams.queue.pop_front()?;
            if self.balancer.is_priority(id) {
                return Some(id);
            }
            streams.queue.push_back(id);
        }
        streams.queue.pop_front()
    }

    /// Pop the next stream the packing loop would pick. Exposed for the
    /// connection's pacing probes; pair with
    /// [`push_active_stream_back`](Self::push_active_stream_back) or the
    /// queue/set invariant breaks.
    #[must_use]
    pub fn pop_active_stream(&self) -> Option<StreamId> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        self.pop_queued(&mut streams)
    }

    /// Requeue a popped stream at the tail.
    pub fn push_active_stream_back(&self, id: StreamId) {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.queue.push_back(id);
    }

    /// Drop all queued stream data and filter the control frames after a
    /// 0-RTT rejection: flow-control credit frames must never have been
    /// queued (fatal), stale *_BLOCKED frames are dropped, everything else
    /// survives in order.
    pub fn handle_0rtt_rejection(&self) -> FramerResult<()> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);

        streams.queue.clear();
        streams.active.clear();

        for frame in control.frames.iter() {
            match frame {
                Frame::MaxData { .. } => {
                    return Err(FramerError::ProtocolViolation("MAX_DATA"));
                }
                Frame::MaxStreamData { .. } => {
                    return Err(FramerError::ProtocolViolation("MAX_STREAM_DATA"));
                }
                Frame::MaxStreams { .. } => {
                    return Err(FramerError::ProtocolViolation("MAX_STREAMS"));
                }
                _ => {}
            }
        }
        control.frames.retain(|frame| {
            !matches!(
                frame,
                Frame::DataBlocked { .. }
                    | Frame::StreamDataBlocked { .. }
                    | Frame::StreamsBlocked { .. }
            )
        });
        Ok(())
    }

    /// Number of streams currently queued.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).queue.len()
    }

    /// Snapshot of the queued stream IDs, oldest first.
    #[must_use]
    pub fn queued_streams(&self) -> Vec<StreamId> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).queue.iter().copied().collect()
    }

    /// Snapshot of the active-stream set.
    #[must_use]
    pub fn active_streams(&self) -> Vec<StreamId> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).active.iter().copied().collect()
    }

    /// Number of queued PATH_RESPONSE frames.
    #[must_use]
    pub fn pending_path_responses(&self) -> usize {
        self.control.lock().unwrap_or_else(PoisonError::into_inner).path_responses.len()
    }

    /// Snapshot of the queued control frames, oldest first.
    #[must_use]
    pub fn queued_control_frames(&self) -> Vec<Frame> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner).frames.clone()
    }
}
