//! Per-zone interlocks evaluated before every control cycle.

use shared::SafetyFlag;

use crate::aggregate::ControlReading;

/// Consecutive out-of-band cycles tolerated before faulting
pub const MAX_SAFETY_FLAGS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// No control thermocouple delivered a usable reading
    SensorLoss,
    Overheat,
    /// Persistently below the setpoint; the class stays armed
    UnderTemperature,
    /// The class safety flag was already cleared elsewhere
    SafetyCleared,
}

impl Fault {
    /// Whether this fault clears the safety flag of the whole class.
    #[inline]
    pub fn is_global(self) -> bool {
        matches!(self, Self::SensorLoss | Self::Overheat)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::SensorLoss => "no valid control reading",
            Self::Overheat => "over temperature",
            Self::UnderTemperature => "under temperature",
            Self::SafetyCleared => "class safety cleared",
        };

        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyVerdict {
    Proceed,
    Halt(Fault),
}

/// Counts consecutive cycles spent outside `setpoint ± range`.
#[derive(Debug, Clone, Default)]
pub struct SafetySupervisor {
    high_temp_error_count: u32,
    low_temp_error_count: u32,
}

impl SafetySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.high_temp_error_count = 0;
        self.low_temp_error_count = 0;
    }

    #[inline]
    pub fn counts(&self) -> (u32, u32) {
        (self.high_temp_error_count, self.low_temp_error_count)
    }

    /// Decide whether the cycle may go on. Global faults clear `flag`.
    ///
    /// `setpoint` is the setpoint in force before this cycle's ramp step.
    pub fn evaluate(
        &mut self,
        reading: ControlReading,
        setpoint: f64,
        safety_range: f64,
        zone_name: &str,
        flag: &SafetyFlag,
    ) -> SafetyVerdict {
        let ControlReading::Valid(control_c) = reading else {
            flag.declare_unsafe(&format!("{}: {}", zone_name, Fault::SensorLoss));
            return SafetyVerdict::Halt(Fault::SensorLoss);
        };

        if !flag.is_safe() {
            return SafetyVerdict::Halt(Fault::SafetyCleared);
        }

        if control_c > setpoint + safety_range {
            self.high_temp_error_count += 1;

            if self.high_temp_error_count >= MAX_SAFETY_FLAGS {
                flag.declare_unsafe(&format!(
                    "{}: {} ({:.1} C against setpoint {:.1} C)",
                    zone_name,
                    Fault::Overheat,
                    control_c,
                    setpoint
                ));
                return SafetyVerdict::Halt(Fault::Overheat);
            }
        } else {
            self.high_temp_error_count = 0;
        }

        if control_c < setpoint - safety_range {
            self.low_temp_error_count += 1;

            if self.low_temp_error_count >= MAX_SAFETY_FLAGS {
                return SafetyVerdict::Halt(Fault::UnderTemperature);
            }
        } else {
            self.low_temp_error_count = 0;
        }

        SafetyVerdict::Proceed
    }
}
