use std::sync::Arc;

use bytes::Bytes;
use weir_balancer::Balancer;
use weir_conformance::ScriptedStreams;
use weir_core::{BalancerSettings, StreamId, Version};
use weir_stream::{Frame, Framer, FramerError, PathResponse, StreamGetter};
use weir_telemetry::NoopSink;

fn harness() -> (Framer, Arc<ScriptedStreams>, Arc<Balancer>) {
    let balancer = Arc::new(Balancer::new(Arc::new(NoopSink), BalancerSettings::default()));
    let streams = Arc::new(ScriptedStreams::new());
    let framer =
        Framer::new(Arc::clone(&streams) as Arc<dyn StreamGetter>, Arc::clone(&balancer));
    (framer, streams, balancer)
}

/// An 18-byte token encodes as a 20-byte NEW_TOKEN frame.
fn control_frame_of_len(len: usize) -> Frame {
    assert!(len >= 3);
    Frame::NewToken { token: Bytes::from(vec![0u8; len - 2]) }
}

#[test]
fn control_frames_drain_lifo_until_budget() {
    let (framer, _streams, _balancer) = harness();
    framer.queue_control(control_frame_of_len(20));
    framer.queue_control(control_frame_of_len(30));

    let mut out = Vec::new();
    let length = framer.append_control(&mut out, 40, Version::V1);

    // The top of the stack (30 bytes) fits; 30 + 20 > 40 stops the drain.
    assert_eq!(length, 30);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].length(Version::V1), 30);
    // The 20-byte frame is still queued.
    assert_eq!(framer.queued_control_frames().len(), 1);
}

#[test]
fn path_response_goes_first() {
    let (framer, _streams, _balancer) = harness();
    framer.queue_control(Frame::PathResponse(PathResponse { data: [7; 8] }));
    // MAX_DATA with an 8-byte varint encodes as 9 bytes.
    framer.queue_control(Frame::MaxData { maximum: 1 << 30 });

    let mut out = Vec::new();
    let length = framer.append_control(&mut out, 20, Version::V1);

    assert_eq!(length, 18);
    assert_eq!(out.len(), 2);
    assert!(matches!(out[0], Frame::PathResponse(_)));
    assert!(matches!(out[1], Frame::MaxData { .. }));
}

#[test]
fn rotation_pops_the_priority_stream() {
    let (framer, _streams, balancer) = harness();
    let (a, b, c) = (StreamId(0), StreamId(4), StreamId(8));
    framer.add_active_stream(a);
    framer.add_active_stream(b);
    framer.add_active_stream(c);
    balancer.prioritize(b);

    assert_eq!(framer.pop_active_stream(), Some(b));
    // A was scanned first and rotated behind C.
    assert_eq!(framer.queued_streams(), vec![c, a]);
}

#[test]
fn zero_rtt_rejection_flags_flow_control_credit() {
    let (framer, _streams, _balancer) = harness();
    framer.queue_control(Frame::DataBlocked { limit: 100 });
    framer.queue_control(Frame::MaxData { maximum: 4_000 });
    framer.queue_control(Frame::Ping);
    framer.add_active_stream(StreamId(4));

    let err = framer.handle_0rtt_rejection().unwrap_err();
    assert_eq!(err, FramerError::ProtocolViolation("MAX_DATA"));
    // Queued stream state is gone either way.
    assert_eq!(framer.queue_len(), 0);
    assert!(framer.active_streams().is_empty());
}

#[test]
fn zero_rtt_rejection_drops_stale_blocked_frames() {
    let (framer, _streams, _balancer) = harness();
    framer.queue_control(Frame::DataBlocked { limit: 100 });
    framer.queue_control(Frame::Ping);
    framer.queue_control(Frame::StreamsBlocked { bidirectional: true, limit: 8 });
    framer.queue_control(Frame::PathChallenge { data: [1; 8] });

    framer.handle_0rtt_rejection().unwrap();
    assert_eq!(
        framer.queued_control_frames(),
        vec![Frame::Ping, Frame::PathChallenge { data: [1; 8] }]
    );
}

#[test]
fn queued_control_is_immediately_visible() {
    let (framer, _streams, _balancer) = harness();
    assert!(!framer.has_data());
    framer.queue_control(Frame::Ping);
    assert!(framer.has_data());
}

#[test]
fn last_stream_frame_drops_its_length_field() {
    let (framer, streams, _balancer) = harness();
    streams.insert(StreamId(0), 200);
    streams.insert(StreamId(1), 200);
    framer.add_active_stream(StreamId(0));
    framer.add_active_stream(StreamId(1));

    let mut out = Vec::new();
    let length = framer.append_stream(&mut out, 600, Version::V1);

    assert_eq!(out.len(), 2);
    assert!(out[0].data_len_present);
    assert!(!out[1].data_len_present);
    let total: usize = out.iter().map(|f| f.length(Version::V1)).sum();
    assert_eq!(length, total);
    assert!(total <= 600);
}

#[test]
fn gate_closure_requeues_the_popped_stream() {
    let (framer, streams, balancer) = harness();
    // Exhaust the default 100-byte allowance for non-priority traffic.
    balancer.register_sent(0, StreamId(3));
    balancer.register_sent(10_000, StreamId(3));
    assert!(!balancer.can_send_uni(1_200));

    streams.insert(StreamId(4), 1_000);
    framer.add_active_stream(StreamId(4));

    let mut out = Vec::new();
    let length = framer.append_stream(&mut out, 1_200, Version::V1);
    assert_eq!(length, 0);
    assert!(out.is_empty());
    // The stream stays queued for a later packet.
    assert_eq!(framer.queued_streams(), vec![StreamId(4)]);
}

#[test]
fn priority_stream_bypasses_the_gate() {
    let (framer, streams, balancer) = harness();
    balancer.register_sent(0, StreamId(3));
    balancer.register_sent(10_000, StreamId(3));
    assert!(!balancer.can_send_uni(1_200));

    let vip = StreamId(0);
    balancer.prioritize(vip);
    streams.insert(vip, 500);
    framer.add_active_stream(vip);

    let mut out = Vec::new();
    let length = framer.append_stream(&mut out, 1_200, Version::V1);
    assert!(length > 0);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].stream_id, vip);
}
