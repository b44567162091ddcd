#![forbid(unsafe_code)]

//! Per-class allowance state.
//!
//! Each traffic class owns a rate monitor and a soft byte allowance over
//! a configured timeframe. A four-state machine gives the allowance
//! AIMD-like hysteresis around the ceiling remembered at the most recent
//! downturn (`lastmax`) instead of oscillating on every tick.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::rate::RateMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthStage {
    Increasing,
    IncreasingSlowly,
    Decreasing,
    DecreasingGentle,
}

#[derive(Debug)]
struct AllowanceState {
    allowed_bytes: u64,
    lastmax: u64,
    stage: GrowthStage,
}

pub struct StreamClass {
    monitor: Arc<RateMonitor>,
    timeframe: Duration,
    floor: u64,
    state: Mutex<AllowanceState>,
}

impl StreamClass {
    #[must_use]
    pub fn new(monitor: Arc<RateMonitor>, timeframe: Duration, initial: u64, floor: u64) -> Self {
        Self {
            monitor,
            timeframe,
            floor,
            state: Mutex::new(AllowanceState {
                allowed_bytes: initial.max(floor),
                lastmax: 1,
                stage: GrowthStage::IncreasingSlowly,
            }),
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<RateMonitor> {
        &self.monitor
    }

    #[must_use]
    pub fn timeframe(&self) -> Duration {
        self.timeframe
    }

    #[must_use]
    pub fn allowed_bytes(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).allowed_bytes
    }

    #[must_use]
    pub fn stage(&self) -> GrowthStage {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).stage
    }

    /// Bytes the class has emitted within its timeframe.
    #[must_use]
    pub fn bytes_in_timeframe(&self) -> u64 {
        self.monitor.bytes_within(self.timeframe)
    }

    /// Whether the class is still inside its soft budget.
    #[must_use]
    pub fn within_allowance(&self) -> bool {
        self.bytes_in_timeframe() <= self.allowed_bytes()
    }

    /// Scale the allowance, clamping to the floor from below.
    pub fn multiply_allowed(&self, factor: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.allowed_bytes = scale_allowance(state.allowed_bytes, factor, self.floor);
    }

    /// Advance the stage machine on this tick's growth factor, then apply
    /// the stage's allowance update.
    pub fn apply_growth(&self, growth: f64) {
        let spent = self.monitor.bytes_within(self.timeframe);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = state.stage;

        if growth < 0.0 {
            state.stage = GrowthStage::Decreasing;
        } else if growth > 1.0 {
            if state.allowed_bytes > state.lastmax {
                state.stage = GrowthStage::Increasing;
                state.lastmax = state.allowed_bytes;
            } else if state.allowed_bytes.saturating_mul(2) > state.lastmax {
                state.stage = GrowthStage::IncreasingSlowly;
            } else {
                state.stage = GrowthStage::Increasing;
            }
        } else if growth < 0.9
            && matches!(previous, GrowthStage::Increasing | GrowthStage::IncreasingSlowly)
        {
            // allowed_bytes never drops below the (positive) floor.
            let ratio = state.lastmax as f64 / state.allowed_bytes as f64;
            if (0.7..=1.2).contains(&ratio) {
                state.stage = GrowthStage::DecreasingGentle;
            } else {
                state.stage = GrowthStage::Decreasing;
                state.lastmax = spent;
            }
        }
        // Everything else holds its stage, including DecreasingGentle
        // while 0.5 < growth < 1.

        let factor = match state.stage {
            GrowthStage::IncreasingSlowly => (growth + 10.0) / 11.0,
            GrowthStage::DecreasingGentle => 0.95,
            _ => growth,
        };
        state.allowed_bytes = scale_allowance(state.allowed_bytes, factor, self.floor);
        trace!(
            growth,
            stage = ?state.stage,
            allowed = state.allowed_bytes,
            "class allowance updated"
        );
    }
}

fn scale_allowance(allowed: u64, factor: f64, floor: u64) -> u64 {
    let scaled = allowed as f64 * factor;
    if !scaled.is_finite() || scaled < floor as f64 {
        floor
    } else {
        scaled as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use weir_telemetry::NoopSink;

    fn class() -> StreamClass {
        let monitor = Arc::new(RateMonitor::new(
            vec![Duration::from_secs(1)],
            Duration::from_millis(500),
            Duration::from_secs(2),
            20,
            0.95,
            Arc::new(NoopSink),
        ));
        StreamClass::new(monitor, Duration::from_secs(1), 100, 10)
    }

    #[test]
    fn multiply_clamps_to_floor() {
        let c = class();
        c.multiply_allowed(0.0001);
        assert_eq!(c.allowed_bytes(), 10);
    }

    #[test]
    fn negative_growth_collapses_to_floor() {
        let c = class();
        c.apply_growth(-1.0);
        assert_eq!(c.stage(), GrowthStage::Decreasing);
        assert_eq!(c.allowed_bytes(), 10);
    }

    #[test]
    fn growth_above_lastmax_marks_increasing() {
        let c = class();
        // allowed (100) > lastmax (1), so the stage flips to Increasing and
        // lastmax catches up.
        c.apply_growth(1.2);
        assert_eq!(c.stage(), GrowthStage::Increasing);
        assert_eq!(c.allowed_bytes(), 120);
    }

    #[test]
    fn downturn_near_lastmax_is_gentle() {
        let c = class();
        c.apply_growth(1.2); // Increasing, lastmax = 100, allowed = 120
        c.apply_growth(0.8); // lastmax/allowed = 100/120 within [0.7, 1.2]
        assert_eq!(c.stage(), GrowthStage::DecreasingGentle);
        assert_eq!(c.allowed_bytes(), 114); // 120 * 0.95
    }

    #[test]
    fn downturn_far_from_lastmax_decreases_hard() {
        let c = class();
        c.apply_growth(1.5); // Increasing, lastmax = 100, allowed = 150
        c.apply_growth(0.5); // lastmax/allowed = 100/150 outside [0.7, 1.2]
        assert_eq!(c.stage(), GrowthStage::Decreasing);
        assert_eq!(c.allowed_bytes(), 75); // 150 * 0.5
    }

    #[test]
    fn within_allowance_with_no_traffic() {
        let c = class();
        assert!(c.within_allowance());
    }
}
