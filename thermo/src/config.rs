//! Stand description, loaded once at startup from a JSON file.

use std::{fs, path::Path, time::Duration};

use pwmlink::gpio::DEFAULT_SSR_PINS;
use serde::Deserialize;
use shared::{
    CONTROL_PERIOD_MS, MAX_DUTY, OPERATOR_SOCKET_PATH, PWM_PERIOD_MS, PWM_SOCKET_PATH,
    TCREADER_SOCKET_PATH,
};

use crate::{
    actuation::CommandRestart,
    cascade::{DEFAULT_DUTY_CLAMP_MAX, DEFAULT_DUTY_CLAMP_MIN},
    Error, Result,
};

/// Heater classes, each with its own safety flag
pub const CLASSES: [&str; 2] = ["furnace", "humidifier"];

fn default_max_data() -> usize {
    3600
}

fn default_max_events() -> usize {
    1000
}

fn default_max_output() -> f64 {
    MAX_DUTY as f64
}

fn default_duty_clamp_min() -> f64 {
    DEFAULT_DUTY_CLAMP_MIN
}

fn default_duty_clamp_max() -> f64 {
    DEFAULT_DUTY_CLAMP_MAX
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_restart_timeout_ms() -> u64 {
    10_000
}

fn default_control_period_ms() -> u64 {
    CONTROL_PERIOD_MS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SensorConfig {
    pub display_name: String,
    /// Index into the thermocouple reader's reply
    pub channel: usize,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub max_temp: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ZoneConfig {
    pub display_name: String,
    #[serde(default)]
    pub output_line: Option<u16>,
    /// 1-based index of the supervising zone within the same class
    #[serde(default)]
    pub supervisor: Option<usize>,
    #[serde(default)]
    pub target: Option<f64>,
    pub temp_safety_range: f64,
    pub cooling_wait_range: f64,
    /// Degrees per minute
    pub ramp_rate: f64,
    #[serde(default = "default_max_output")]
    pub max_output: f64,
    pub integral_max: f64,
    pub integral_min: f64,
    #[serde(default)]
    pub output_bias: f64,
    #[serde(default)]
    pub zero_integral_on_crossover: bool,
    #[serde(default = "default_duty_clamp_min")]
    pub duty_clamp_min: f64,
    #[serde(default = "default_duty_clamp_max")]
    pub duty_clamp_max: f64,
    #[serde(default)]
    pub p: f64,
    #[serde(default)]
    pub i: f64,
    #[serde(default)]
    pub d: f64,
    pub control_sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub extra_sensors: Vec<SensorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClassConfig {
    /// Readings kept per thermocouple
    #[serde(default = "default_max_data")]
    pub max_data: usize,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            max_data: default_max_data(),
            zones: Vec::new(),
        }
    }
}

/// Where a device daemon listens and how to bring it back.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LinkConfig {
    pub socket: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub restart_command: Vec<String>,
    /// Restart commands still running after this are killed
    #[serde(default = "default_restart_timeout_ms")]
    pub restart_timeout_ms: u64,
}

impl LinkConfig {
    /// The configured restart command, if any.
    pub fn restart(&self) -> Option<CommandRestart> {
        CommandRestart::new(self.restart_command.clone())
            .map(|restart| restart.with_timeout(Duration::from_millis(self.restart_timeout_ms)))
    }

    fn with_socket(socket: &str) -> Self {
        Self {
            socket: socket.to_owned(),
            timeout_ms: default_timeout_ms(),
            restart_command: Vec::new(),
            restart_timeout_ms: default_restart_timeout_ms(),
        }
    }
}

fn default_pwm() -> LinkConfig {
    LinkConfig::with_socket(PWM_SOCKET_PATH)
}

fn default_telemetry() -> LinkConfig {
    LinkConfig::with_socket(TCREADER_SOCKET_PATH)
}

fn default_operator_socket() -> String {
    OPERATOR_SOCKET_PATH.to_owned()
}

fn default_pwm_channels() -> u16 {
    DEFAULT_SSR_PINS.len() as u16
}

fn default_pwm_period_ms() -> u64 {
    PWM_PERIOD_MS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StandConfig {
    #[serde(default)]
    pub furnace: ClassConfig,
    #[serde(default)]
    pub humidifier: ClassConfig,
    #[serde(default = "default_pwm")]
    pub pwm: LinkConfig,
    /// Relays on the pwm daemon, numbered from 1
    #[serde(default = "default_pwm_channels")]
    pub pwm_channels: u16,
    #[serde(default = "default_pwm_period_ms")]
    pub pwm_period_ms: u64,
    #[serde(default = "default_telemetry")]
    pub telemetry: LinkConfig,
    #[serde(default = "default_operator_socket")]
    pub operator_socket: String,
    #[serde(default = "default_control_period_ms")]
    pub control_period_ms: u64,
    /// Zone events kept for `status`
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl std::str::FromStr for StandConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl StandConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        fs::read_to_string(path)?.parse()
    }

    /// Class configs in `CLASSES` order.
    pub fn classes(&self) -> [(&'static str, &ClassConfig); 2] {
        [(CLASSES[0], &self.furnace), (CLASSES[1], &self.humidifier)]
    }

    pub fn validate(&self) -> Result<()> {
        let mut lines = Vec::new();

        for (class, class_config) in self.classes() {
            if class_config.max_data == 0 {
                return Err(Error::Config(format!("{}: max-data must be positive", class)));
            }

            for (index, zone) in class_config.zones.iter().enumerate() {
                let at = |what: &str| Error::Config(format!("{} zone {} ({}): {}", class, index + 1, zone.display_name, what));

                if zone.control_sensors.is_empty() {
                    return Err(at("no control sensors"));
                }
                if zone.temp_safety_range <= 0.0 || zone.cooling_wait_range < 0.0 {
                    return Err(at("ranges must be positive"));
                }
                if zone.ramp_rate <= 0.0 {
                    return Err(at("ramp-rate must be positive"));
                }
                if zone.max_output <= 0.0 || zone.max_output > MAX_DUTY as f64 {
                    return Err(at("max-output must be within (0, 100]"));
                }
                if zone.integral_min > zone.integral_max {
                    return Err(at("integral-min above integral-max"));
                }
                if zone.duty_clamp_min > zone.duty_clamp_max {
                    return Err(at("duty-clamp-min above duty-clamp-max"));
                }
                if [zone.p, zone.i, zone.d].iter().any(|gain| *gain < 0.0) {
                    return Err(at("gains must not be negative"));
                }
                if zone.supervisor == Some(0) {
                    return Err(at("supervisors are numbered from 1"));
                }

                if let Some(line) = zone.output_line {
                    if !(1..=self.pwm_channels).contains(&line) {
                        return Err(at(&format!(
                            "output line {} outside 1..={}",
                            line, self.pwm_channels
                        )));
                    }
                    if lines.contains(&line) {
                        return Err(at(&format!("output line {} already in use", line)));
                    }
                    lines.push(line);
                }
            }
        }

        Ok(())
    }
}
