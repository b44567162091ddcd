use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use weir_balancer::{Balancer, GrowthStage, RateMonitor, StreamClass};
use weir_core::{BalancerSettings, RttStats, StreamId};
use weir_telemetry::NoopSink;

/// Gate closes once the non-priority class outspends its allowance.
#[test]
fn gate_closes_under_saturation() {
    let settings = BalancerSettings { allowed_initial: 1_500_000, ..BalancerSettings::default() };
    let balancer = Balancer::new(Arc::new(NoopSink), settings);

    // 2 MB in quick succession, all non-priority.
    for _ in 0..8 {
        balancer.register_sent(250_000, StreamId(3));
    }
    assert!(!balancer.can_send_uni(1_200));
}

/// A collapsed priority bitrate (current rate far below the recent peak
/// median) drives the non-priority allowance straight to the floor.
#[tokio::test]
async fn bitrate_ratio_collapse_floors_the_allowance() {
    let settings = BalancerSettings {
        bitrate_over_ms: 200,
        allowed_initial: 10_000,
        ..BalancerSettings::default()
    };
    let balancer = Balancer::new(Arc::new(NoopSink), settings);
    let vip = StreamId(0);
    balancer.prioritize(vip);

    // Build a peak: ~750 kB inside the measurement window.
    for _ in 0..4 {
        balancer.register_sent(250_000, vip);
    }
    balancer.priority_class().monitor().poll_once();
    assert!(balancer.priority_class().monitor().max_median() > 0);

    // Let the burst age out of the 2x window, then trickle.
    tokio::time::sleep(Duration::from_millis(450)).await;
    balancer.register_sent(25_000, vip);
    balancer.register_sent(25_000, vip);

    balancer.tick_once();

    assert_eq!(balancer.rest_class().stage(), GrowthStage::Decreasing);
    assert_eq!(balancer.rest_class().allowed_bytes(), 10);
}

/// With no signal at all, repeated ticks keep the allowance at or above
/// the floor.
#[test]
fn idle_ticks_respect_the_floor() {
    let balancer = Balancer::new(Arc::new(NoopSink), BalancerSettings::default());
    for _ in 0..200 {
        balancer.tick_once();
        assert!(balancer.rest_class().allowed_bytes() >= 10);
    }
}

/// Metrics callbacks feed the RTT monitor, with identical repeats dropped.
#[test]
fn update_metrics_feeds_rtt_once_per_change() {
    let balancer = Balancer::new(Arc::new(NoopSink), BalancerSettings::default());
    let stats = |ms: u64| RttStats {
        latest: Duration::from_millis(ms),
        smoothed: Duration::from_millis(ms),
        min: Duration::from_millis(ms),
    };
    balancer.update_metrics(&stats(30), 12_000, 6_000, 5);
    balancer.update_metrics(&stats(30), 13_000, 6_000, 5);
    balancer.update_metrics(&stats(35), 13_000, 6_000, 5);
    assert_eq!(balancer.rtt_monitor().sample_count(), 2);
}

/// Background tasks stop at the shutdown signal.
#[tokio::test]
async fn tasks_exit_on_shutdown() {
    let settings = BalancerSettings { tick_every_ms: 10, poll_every_ms: 10, ..Default::default() };
    let balancer = Arc::new(Balancer::new(Arc::new(NoopSink), settings));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handles = balancer.spawn_tasks(rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).expect("receivers alive");
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task failed to observe shutdown")
            .expect("task panicked");
    }
}

proptest! {
    // Invariant 9: the allowance never drops below the floor, whatever
    // growth sequence the feedback loop produces.
    #[test]
    fn allowance_floor_survives_any_growth_sequence(
        growths in proptest::collection::vec(-2.0f64..2.0f64, 1..200),
    ) {
        let monitor = Arc::new(RateMonitor::new(
            vec![Duration::from_secs(1)],
            Duration::from_millis(500),
            Duration::from_secs(2),
            20,
            0.95,
            Arc::new(NoopSink),
        ));
        let class = StreamClass::new(monitor, Duration::from_secs(1), 100, 10);
        for growth in growths {
            class.apply_growth(growth);
            prop_assert!(class.allowed_bytes() >= 10);
        }
    }
}
