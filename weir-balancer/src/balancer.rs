#![forbid(unsafe_code)]

//! The per-connection balancer.
//!
//! Owns the rate and RTT monitors and both traffic classes, runs the
//! feedback tick, and answers the framer's gate query. The tick and the
//! monitor polls run as tokio tasks; the gate and the byte accounting are
//! called from the packet assembly hot path and only ever take brief leaf
//! locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;
use weir_core::{BalancerSettings, RttStats, StreamId};
use weir_telemetry::TelemetrySink;

use crate::class::StreamClass;
use crate::rate::RateMonitor;
use crate::rtt::RttMonitor;
use crate::scorer::SlopeScorer;

/// Which balancer class a stream's bytes are accounted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    Priority,
    NonPriority,
}

#[derive(Debug, Default)]
struct LinkState {
    cwnd: u64,
    bytes_in_flight: u64,
}

pub struct Balancer {
    settings: BalancerSettings,
    sink: Arc<dyn TelemetrySink>,

    priority_class: StreamClass,
    rest_class: StreamClass,
    rtt_monitor: Arc<RttMonitor>,

    /// Stream registrations; unknown IDs fall into [`TrafficClass::NonPriority`].
    classes: RwLock<HashMap<StreamId, TrafficClass>>,

    priority_scorer: Mutex<SlopeScorer>,
    last_rtt: Mutex<Option<Duration>>,
    last_priority_frame: Mutex<Instant>,
    link: Mutex<LinkState>,
}

impl Balancer {
    #[must_use]
    pub fn new(sink: Arc<dyn TelemetrySink>, settings: BalancerSettings) -> Self {
        let priority_monitor = Arc::new(RateMonitor::new(
            settings.priority_horizons(),
            settings.poll_every(),
            settings.bitrate_over(),
            settings.peak_entries,
            settings.peak_decay,
            Arc::clone(&sink),
        ));
        let rest_monitor = Arc::new(RateMonitor::new(
            settings.rest_horizons(),
            settings.poll_every(),
            settings.bitrate_over(),
            settings.peak_entries,
            settings.peak_decay,
            Arc::clone(&sink),
        ));
        let rtt_monitor = Arc::new(RttMonitor::new(settings.rtt_horizons(), Arc::clone(&sink)));

        let priority_class = StreamClass::new(
            priority_monitor,
            settings.timeframe(),
            settings.allowed_initial,
            settings.allowed_floor,
        );
        let rest_class = StreamClass::new(
            rest_monitor,
            settings.timeframe(),
            settings.allowed_initial,
            settings.allowed_floor,
        );

        Self {
            settings,
            sink,
            priority_class,
            rest_class,
            rtt_monitor,
            classes: RwLock::new(HashMap::new()),
            priority_scorer: Mutex::new(SlopeScorer::new()),
            last_rtt: Mutex::new(None),
            last_priority_frame: Mutex::new(Instant::now()),
            link: Mutex::new(LinkState::default()),
        }
    }

    /// Spawn the feedback tick and both monitor poll tasks. All of them
    /// observe `shutdown` at their next timer wakeup and exit.
    pub fn spawn_tasks(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.priority_class.monitor().spawn_poll_task(shutdown.clone()),
            self.rest_class.monitor().spawn_poll_task(shutdown.clone()),
        ];

        let balancer = Arc::clone(self);
        let mut shutdown = shutdown;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(balancer.settings.tick_every());
            loop {
                tokio::select! {
                    _ = ticker.tick() => balancer.tick_once(),
                    _ = shutdown.changed() => break,
                }
            }
        }));
        handles
    }

    /// One pass of the feedback loop.
    pub fn tick_once(&self) {
        let priority = self.priority_class.monitor();
        priority.regress_all();
        self.sink.debug("monitor_results", &priority.summary());

        let status = self
            .priority_scorer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .score(priority.short_term_slope());

        let mut growth = 1.2_f64;
        if status < 0.9 {
            growth *= status * status;
        }
        if status > 1.0 {
            growth *= status.min(1.5);
        }

        let median = priority.max_median();
        if median > 0 {
            let ratio = priority.peak_window_bytes() as f64 / median as f64;
            if ratio < 0.5 {
                growth = -1.0;
                self.sink
                    .debug("balancer", "priority bitrate below half of recent peak, collapsing");
            } else if ratio < 1.0 {
                growth *= ratio * ratio;
            }
        }

        self.rtt_monitor.regress_all();
        if self.rtt_monitor.surge_score() > 0.8 {
            growth *= 0.7;
        }

        let spent = self.rest_class.bytes_in_timeframe();
        if (spent as f64) < 0.9 * self.rest_class.allowed_bytes() as f64 {
            // An unused budget does not grow.
            growth = growth.min(0.99);
        }
        growth = growth.min(1.5);

        self.rest_class.apply_growth(growth);
        trace!(growth, allowed = self.rest_class.allowed_bytes(), "balancer tick");
    }

    /// Gate query for the framer hot path: may a non-priority stream
    /// contribute bytes right now? `size` is accepted for future
    /// per-frame sizing and currently ignored.
    #[must_use]
    pub fn can_send_uni(&self, size: usize) -> bool {
        let _ = size;
        let allowed = self.rest_class.within_allowance();
        if allowed {
            self.sink.debug("can_send_uni", "can send uniframe");
        } else {
            self.sink.debug("can_send_uni", "cant send uniframe");
        }
        allowed
    }

    /// Account `size` sent bytes against the class of `stream_id`.
    pub fn register_sent(&self, size: usize, stream_id: StreamId) {
        match self.class_of(stream_id) {
            TrafficClass::Priority => {
                self.priority_class.monitor().add_sent(size as u64);
                *self.last_priority_frame.lock().unwrap_or_else(PoisonError::into_inner) =
                    Instant::now();
            }
            TrafficClass::NonPriority => self.rest_class.monitor().add_sent(size as u64),
        }
    }

    /// Register `stream_id` as priority traffic. Append-only; readable
    /// concurrently from the framer.
    pub fn prioritize(&self, stream_id: StreamId) {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream_id, TrafficClass::Priority);
    }

    #[must_use]
    pub fn is_priority(&self, stream_id: StreamId) -> bool {
        self.class_of(stream_id) == TrafficClass::Priority
    }

    fn class_of(&self, stream_id: StreamId) -> TrafficClass {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stream_id)
            .copied()
            .unwrap_or(TrafficClass::NonPriority)
    }

    /// Record an RTT sample, dropping identical repeats from the metrics
    /// callback.
    pub fn add_rtt_sample(&self, rtt: Duration) {
        let mut last = self.last_rtt.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(rtt) {
            return;
        }
        *last = Some(rtt);
        drop(last);
        self.rtt_monitor.add_sample(rtt);
    }

    /// Metrics callback from the transport. Feeds the RTT monitor, logs
    /// congestion window changes, and forwards the event to the sink.
    pub fn update_metrics(
        &self,
        rtt: &RttStats,
        cwnd: u64,
        bytes_in_flight: u64,
        packets_in_flight: usize,
    ) {
        self.add_rtt_sample(rtt.latest_rtt());
        {
            let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
            if cwnd != link.cwnd {
                self.sink.debug(
                    "update_metrics",
                    &format!(
                        "cwnd changed from {} to {}\tbytes_in_flight:{}",
                        link.cwnd, cwnd, bytes_in_flight
                    ),
                );
            }
            link.cwnd = cwnd;
            link.bytes_in_flight = bytes_in_flight;
        }
        self.sink.metrics_updated(rtt, cwnd, bytes_in_flight, packets_in_flight);
    }

    /// Debug event with the time since the last priority frame and the
    /// last observed link state.
    pub fn status_report(&self) {
        let since =
            self.last_priority_frame.lock().unwrap_or_else(PoisonError::into_inner).elapsed();
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        self.sink.debug(
            "balancer status report",
            &format!(
                "time since last priority frame: {:?}\ncwnd: {}  bytes_in_flight: {}",
                since, link.cwnd, link.bytes_in_flight
            ),
        );
    }

    /// Forward a debug event to the telemetry sink.
    pub fn debug(&self, name: &str, msg: &str) {
        self.sink.debug(name, msg);
    }

    #[must_use]
    pub fn priority_class(&self) -> &StreamClass {
        &self.priority_class
    }

    #[must_use]
    pub fn rest_class(&self) -> &StreamClass {
        &self.rest_class
    }

    #[must_use]
    pub fn rtt_monitor(&self) -> &Arc<RttMonitor> {
        &self.rtt_monitor
    }

    #[must_use]
    pub fn settings(&self) -> &BalancerSettings {
        &self.settings
    }
}
