#![doc = include_str!("../README.md")]

pub mod actuation;
pub mod aggregate;
pub mod cascade;
pub mod clock;
pub mod config;
pub mod operator;
pub mod pid;
pub mod ramp;
pub mod registry;
pub mod safety;
pub mod scheduler;
pub mod stand;
pub mod telemetry;
pub mod zone;

/// Zone identifiers start at 1
pub type ZoneId = usize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("invalid zone topology: {0}")]
    Topology(String),
    #[error("zone {0} does not exist")]
    UnknownZone(ZoneId),
    #[error("zone {0} has no target")]
    NoTarget(ZoneId),
    #[error("{0} safety is not armed")]
    Unsafe(String),
    #[error("telemetry: {0}")]
    Telemetry(String),
    #[error("bad operator command: {0}")]
    Command(String),
    #[error(transparent)]
    Link(#[from] pwmlink::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Bound `value` to `[min, max]`, never panicking on a misordered range.
#[inline]
pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
