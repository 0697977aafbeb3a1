//! Rate-limited setpoint approach.

use std::time::Instant;

/// The setpoint snaps onto a target this many seconds of ramp away
const SNAP_SECONDS: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampParams {
    pub target: f64,
    /// Degrees per minute
    pub rate: f64,
    /// A falling setpoint only moves while the zone is at most this far
    /// above it
    pub cooling_range: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SetpointRamper {
    last_ramp_time: Option<Instant>,
}

impl SetpointRamper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_ramp_time = None;
    }

    /// Move `setpoint` toward the target by at most `rate × elapsed`.
    ///
    /// The first call after a reset only records the time. Rising setpoints
    /// always move; falling setpoints wait until the zone has cooled to
    /// within `cooling_range` of them.
    pub fn advance(&mut self, setpoint: f64, control_c: f64, params: RampParams, now: Instant) -> f64 {
        let Some(last) = self.last_ramp_time.replace(now) else {
            return setpoint;
        };

        let rate_per_s = params.rate / 60.0;
        let step = rate_per_s * now.saturating_duration_since(last).as_secs_f64();
        let target = params.target;

        if setpoint != target && (target - setpoint).abs() <= SNAP_SECONDS * rate_per_s {
            target
        } else if setpoint < target {
            (setpoint + step).min(target)
        } else if setpoint > target && control_c - setpoint <= params.cooling_range {
            (setpoint - step).max(target)
        } else {
            setpoint
        }
    }
}
