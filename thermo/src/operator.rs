//! Operator commands, one text line each, answered with one reply.
//!
//! ```text
//! start <zone>                    stop <zone>            stop-all
//! target <zone> <°C>              rate <zone> <°C/min>
//! gains <zone> <p> <i> <d>        bias <zone> <%>        override <zone> <%>
//! toggle <zone> override|crossover
//! rearm [furnace|humidifier]      status                 shutdown
//! ```

use std::{fmt::Write, str::FromStr};

use shared::toggle::toggle;
use tracing::info;

use crate::{pid::PidGains, stand::Stand, zone::ZoneController, Error, Result, ZoneId};

/// Events listed by `status`
const STATUS_EVENTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Drive the fixed override duty instead of the PID output
    Override,
    /// Zero the integral when the input crosses the target
    Crossover,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Start(ZoneId),
    Stop(ZoneId),
    StopAll,
    Target(ZoneId, f64),
    Rate(ZoneId, f64),
    Gains(ZoneId, PidGains),
    Bias(ZoneId, f64),
    Override(ZoneId, f64),
    Toggle(ZoneId, Switch),
    Rearm(Option<String>),
    Status,
    /// Stop every zone and exit the controller
    Shutdown,
}

fn number<T: FromStr>(word: Option<&str>, what: &str) -> Result<T> {
    let word = word.ok_or_else(|| Error::Command(format!("missing {}", what)))?;

    word.parse()
        .map_err(|_| Error::Command(format!("bad {} {:?}", what, word)))
}

fn finite(value: f64, what: &str) -> Result<f64> {
    match value.is_finite() {
        true => Ok(value),
        false => Err(Error::Command(format!("{} must be finite", what))),
    }
}

impl FromStr for OperatorCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();

        let keyword = words
            .next()
            .ok_or_else(|| Error::Command("empty command".to_owned()))?;

        let command = match keyword {
            "status" => Self::Status,
            "shutdown" => Self::Shutdown,
            "stop-all" => Self::StopAll,
            "rearm" => Self::Rearm(words.next().map(str::to_owned)),
            "start" => Self::Start(number(words.next(), "zone")?),
            "stop" => Self::Stop(number(words.next(), "zone")?),
            "target" => {
                let zone = number(words.next(), "zone")?;
                Self::Target(zone, finite(number(words.next(), "target")?, "target")?)
            }
            "rate" => {
                let zone = number(words.next(), "zone")?;
                let rate = finite(number(words.next(), "rate")?, "rate")?;

                if rate <= 0.0 {
                    return Err(Error::Command("rate must be positive".to_owned()));
                }

                Self::Rate(zone, rate)
            }
            "gains" => {
                let zone = number(words.next(), "zone")?;
                let gains = PidGains {
                    p: finite(number(words.next(), "p")?, "p")?,
                    i: finite(number(words.next(), "i")?, "i")?,
                    d: finite(number(words.next(), "d")?, "d")?,
                };

                if gains.p < 0.0 || gains.i < 0.0 || gains.d < 0.0 {
                    return Err(Error::Command("gains must not be negative".to_owned()));
                }

                Self::Gains(zone, gains)
            }
            "bias" => {
                let zone = number(words.next(), "zone")?;
                Self::Bias(zone, finite(number(words.next(), "bias")?, "bias")?)
            }
            "override" => {
                let zone = number(words.next(), "zone")?;
                Self::Override(zone, finite(number(words.next(), "duty")?, "duty")?)
            }
            "toggle" => {
                let zone = number(words.next(), "zone")?;
                let switch = match words.next() {
                    Some("override") => Switch::Override,
                    Some("crossover") => Switch::Crossover,
                    other => return Err(Error::Command(format!("unknown switch {:?}", other))),
                };
                Self::Toggle(zone, switch)
            }
            other => return Err(Error::Command(format!("unknown command {:?}", other))),
        };

        match words.next() {
            Some(extra) => Err(Error::Command(format!("unexpected {:?}", extra))),
            None => Ok(command),
        }
    }
}

fn zone(stand: &Stand, id: ZoneId) -> Result<&ZoneController> {
    stand.registry.zone(id).ok_or(Error::UnknownZone(id))
}

fn show(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| format!("{:.1}", v))
}

pub fn status(stand: &Stand) -> String {
    let mut text = String::new();

    for zone in stand.registry.zones() {
        let outputs = zone.outputs();

        writeln!(
            text,
            "{} {}: heating={} temp={} setpoint={} target={} output={}",
            zone.id(),
            zone.name(),
            outputs.heating.get(),
            show(outputs.control_temperature.get().or(zone.control_reading().value())),
            show(outputs.setpoint.get()),
            show(zone.settings().target.get()),
            show(outputs.output.get()),
        )
        .unwrap_or_default();
    }

    for flag in &stand.flags {
        writeln!(text, "{}: {}", flag.class(), if flag.is_safe() { "armed" } else { "UNSAFE" })
            .unwrap_or_default();
    }

    let events = stand.events.snapshot();
    for event in events.iter().rev().take(STATUS_EVENTS).rev() {
        writeln!(
            text,
            "{} zone {}: {:?}",
            event.at.format("%Y-%m-%d %H:%M:%S"),
            event.zone,
            event.kind
        )
        .unwrap_or_default();
    }

    text
}

/// Carry out `command`, returning the text to send back.
pub fn apply(command: &OperatorCommand, stand: &Stand) -> Result<String> {
    info!(?command, "operator command");

    match command {
        OperatorCommand::Status => return Ok(status(stand)),
        OperatorCommand::Start(id) => stand.registry.start(*id)?,
        OperatorCommand::Stop(id) => stand.registry.stop(*id)?,
        OperatorCommand::StopAll => stand.registry.stop_all(),
        OperatorCommand::Shutdown => {
            stand.registry.stop_all();
            stand.request_shutdown();
        }
        OperatorCommand::Target(id, target) => zone(stand, *id)?.settings().target.set(Some(*target)),
        OperatorCommand::Rate(id, rate) => zone(stand, *id)?.settings().ramp_rate.set(*rate),
        OperatorCommand::Gains(id, gains) => zone(stand, *id)?.settings().gains.set(*gains),
        OperatorCommand::Bias(id, bias) => zone(stand, *id)?.settings().output_bias.set(*bias),
        OperatorCommand::Override(id, duty) => {
            zone(stand, *id)?.settings().output_override.set(*duty)
        }
        OperatorCommand::Toggle(id, switch) => {
            let settings = zone(stand, *id)?.settings();
            let model = match switch {
                Switch::Override => &settings.apply_override,
                Switch::Crossover => &settings.zero_integral_on_crossover,
            };

            let state = toggle(model);
            return Ok(format!("{:?} {}", switch, if state.is_on() { "on" } else { "off" }).to_lowercase());
        }
        OperatorCommand::Rearm(class) => {
            let flags: Vec<_> = match class {
                Some(class) => vec![stand
                    .flag(class)
                    .ok_or_else(|| Error::Command(format!("unknown class {:?}", class)))?],
                None => stand.flags.iter().collect(),
            };

            for flag in flags {
                flag.rearm();
            }
        }
    }

    Ok("ok".to_owned())
}

/// Parse and apply one request line. Failures become `error: ...` replies.
pub fn handle(line: &str, stand: &Stand) -> String {
    match line.parse::<OperatorCommand>().and_then(|command| apply(&command, stand)) {
        Ok(reply) => reply,
        Err(e) => format!("error: {}", e),
    }
}
