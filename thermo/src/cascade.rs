//! Supervisor/supervisee coupling.
//!
//! A supervisee copies its supervisor's control temperature as its setpoint
//! and may only deviate from the supervisor's unclamped output by a small
//! band. Everything here reads the supervisor's published models; nothing
//! touches its control state.

use crate::{clamp, registry::ZoneRegistry, zone::ZoneController};

pub const DEFAULT_DUTY_CLAMP_MIN: f64 = 0.99;
pub const DEFAULT_DUTY_CLAMP_MAX: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorContext {
    /// `None` while the supervisor has no valid control reading
    pub control_temperature: Option<f64>,
    /// The supervisor's last unclamped output, zero if it has none
    pub duty: f64,
}

/// The context of `zone`'s supervisor, or `None` for a top-level zone.
///
/// Both values come from the supervisor's last published cycle, so a
/// supervisee cycling before its supervisor in the same period sees the
/// previous period's values.
pub fn supervisor_context(registry: &ZoneRegistry, zone: &ZoneController) -> Option<SupervisorContext> {
    let supervisor = registry.zone(zone.supervisor()?)?;

    Some(SupervisorContext {
        control_temperature: supervisor.outputs().control_temperature.get(),
        duty: supervisor.outputs().unclamped_output.get().unwrap_or(0.0),
    })
}

/// Add the local correction to the supervisor's duty and keep the sum
/// within `[band_min, band_max] × supervisor duty`.
pub fn combine(local: f64, supervisor_duty: f64, band_min: f64, band_max: f64) -> f64 {
    let a = supervisor_duty * band_min;
    let b = supervisor_duty * band_max;

    clamp(local + supervisor_duty, a.min(b), a.max(b))
}
