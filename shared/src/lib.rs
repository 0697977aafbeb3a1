#![doc = include_str!("../README.md")]

use std::{thread::sleep, time::Instant};

pub mod model;
pub mod safety;
pub mod toggle;

pub use model::{ListModel, SignalModel};
pub use safety::SafetyFlag;
pub use toggle::{ControlMode, MonitorMode, Toggle, VoltageRelative};

/// Socket the relay/PWM device daemon listens on
pub static PWM_SOCKET_PATH: &str = "/tmp/pwm.sock";
/// Socket the thermocouple reader listens on
pub static TCREADER_SOCKET_PATH: &str = "/tmp/tcreader.sock";
/// Socket the temperature controller accepts operator commands on
pub static OPERATOR_SOCKET_PATH: &str = "/tmp/thermo.sock";

/// Period of the zone control loop in ms
pub const CONTROL_PERIOD_MS: u64 = 1000;
/// Period of one relay on/off cycle on the PWM device in ms
pub const PWM_PERIOD_MS: u64 = 1000;
/// Sub-iterations per relay period
pub const PWM_ITERATIONS: u32 = 100;
/// Largest duty value, in percent
pub const MAX_DUTY: u8 = 100;

#[inline]
pub fn sleep_till(instant: Instant) {
    let time_now = Instant::now();

    let sleep_dur = instant.saturating_duration_since(time_now);

    sleep(sleep_dur)
}
