//! PID with crossover integral reset and a clamped integral.

use std::time::Instant;

use crate::clamp;

/// Stand-in elapsed time for the first cycle after a reset, in seconds
pub const FIRST_CYCLE_DT: f64 = 1e-16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidLimits {
    pub integral_min: f64,
    pub integral_max: f64,
    /// Drop the integral whenever the input crosses the target
    pub zero_on_crossover: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl PidTerms {
    #[inline]
    pub fn output(&self) -> f64 {
        self.p + self.i + self.d
    }
}

#[derive(Debug, Clone, Copy)]
struct LastCycle {
    error: f64,
    input: f64,
    target: f64,
    time: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct PidEngine {
    integral: f64,
    last: Option<LastCycle>,
}

impl PidEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last = None;
    }

    #[inline]
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// One cycle toward `setpoint`. The integral tracks the error against the
    /// ramped `setpoint`, crossover is judged against the final `target`.
    pub fn compute(
        &mut self,
        setpoint: f64,
        input: f64,
        target: f64,
        gains: PidGains,
        limits: PidLimits,
        now: Instant,
    ) -> PidTerms {
        let error = setpoint - input;

        let dt = match self.last {
            Some(last) => now.saturating_duration_since(last.time).as_secs_f64(),
            None => FIRST_CYCLE_DT,
        };

        let p = gains.p * error;

        let same_side = self.last.is_some_and(|last| {
            !limits.zero_on_crossover || (input > target) == (last.input > last.target)
        });

        if gains.i > 0.0 && same_side {
            self.integral = clamp(
                self.integral + gains.i * error * dt,
                limits.integral_min,
                limits.integral_max,
            );
        } else {
            self.integral = 0.0;
        }

        let d = match self.last {
            Some(last) if gains.d > 0.0 && dt > 0.0 => {
                let d = gains.d * (error - last.error) / dt;
                if d.is_finite() {
                    d
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        self.last = Some(LastCycle {
            error,
            input,
            target,
            time: now,
        });

        PidTerms {
            p,
            i: self.integral,
            d,
        }
    }
}
