//! Thermocouple collection.
//!
//! One reading per channel is fetched from the thermocouple reader every
//! control period and appended to each sensor's history. The reader is
//! restarted when it stalls; a reader that keeps stalling, or any sensor
//! passing its hard limit, clears the safety flags.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use pwmlink::usockets::LineClient;
use shared::{ListModel, SafetyFlag};
use tracing::{debug, warn};

use crate::{
    actuation::DeviceRestart,
    aggregate::DISCONNECTED_C,
    Error, Result,
};

/// Consecutive failed reads that make a stall
pub const MAX_BAD_READS: u32 = 10;
/// Stalls answered with a reader restart before declaring unsafe
pub const MAX_SOURCE_RESTARTS: u32 = 2;
/// Request understood by the thermocouple reader
pub const TCREADER_REQUEST: &str = "tcreader";

pub struct Sensor {
    pub name: String,
    /// Index into the reader's reply
    pub channel: usize,
    pub is_control: bool,
    /// Calibration added to every connected reading
    pub offset: f64,
    /// Hard limit, past which the class is declared unsafe
    pub max_temp: Option<f64>,
    pub readings: ListModel<f64>,
}

impl Sensor {
    pub fn new(name: &str, channel: usize, is_control: bool, max_data: usize) -> Self {
        Self {
            name: name.to_owned(),
            channel,
            is_control,
            offset: 0.0,
            max_temp: None,
            readings: ListModel::new(Some(max_data)),
        }
    }

    #[inline]
    pub fn latest(&self) -> Option<f64> {
        self.readings.last()
    }
}

/// The sensors whose limits guard one safety flag.
#[derive(Clone)]
pub struct ClassSensors {
    pub flag: Arc<SafetyFlag>,
    pub sensors: Vec<Arc<Sensor>>,
}

pub trait TelemetrySource: Send {
    /// Latest reading of every channel, channel 0 first.
    fn read(&mut self) -> Result<Vec<f64>>;

    fn restart(&mut self);
}

/// The thermocouple reader daemon, one comma-separated line per request.
pub struct TcReaderSource<R: DeviceRestart> {
    client: LineClient,
    restart: R,
}

impl<R: DeviceRestart> TcReaderSource<R> {
    pub fn new(path: &str, timeout: Duration, restart: R) -> Self {
        Self {
            client: LineClient::new(path, timeout),
            restart,
        }
    }
}

pub fn parse_readings(line: &str) -> Result<Vec<f64>> {
    line.split(',')
        .map(|word| {
            word.trim()
                .parse::<f64>()
                .map_err(|_| Error::Telemetry(format!("bad reading {:?}", word)))
        })
        .collect()
}

impl<R: DeviceRestart> TelemetrySource for TcReaderSource<R> {
    fn read(&mut self) -> Result<Vec<f64>> {
        parse_readings(&self.client.request(TCREADER_REQUEST)?)
    }

    fn restart(&mut self) {
        self.restart.restart();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    Recorded,
    /// Nth consecutive failed read
    Failed(u32),
    /// Nth stall, the reader was restarted
    Restarted(u32),
    DeclaredUnsafe,
    /// Still stalling after declaring unsafe
    Down,
}

pub struct TelemetryCollector<S: TelemetrySource> {
    source: S,
    classes: Vec<ClassSensors>,
    times: Arc<ListModel<DateTime<Local>>>,
    channels: usize,
    bad_reads: u32,
    restarts: u32,
}

impl<S: TelemetrySource> TelemetryCollector<S> {
    pub fn new(source: S, classes: Vec<ClassSensors>, times: Arc<ListModel<DateTime<Local>>>) -> Self {
        let channels = classes
            .iter()
            .flat_map(|class| &class.sensors)
            .map(|sensor| sensor.channel + 1)
            .max()
            .unwrap_or(0);

        Self {
            source,
            classes,
            times,
            channels,
            bad_reads: 0,
            restarts: 0,
        }
    }

    pub fn collect(&mut self) -> CollectOutcome {
        self.collect_at(Local::now())
    }

    pub fn collect_at(&mut self, at: DateTime<Local>) -> CollectOutcome {
        let values = match self.source.read() {
            Ok(values) if values.len() >= self.channels => values,
            Ok(values) => {
                return self.failed(Error::Telemetry(format!(
                    "{} channels read, {} needed",
                    values.len(),
                    self.channels
                )))
            }
            Err(e) => return self.failed(e),
        };

        self.bad_reads = 0;
        self.restarts = 0;

        for class in &self.classes {
            for sensor in &class.sensors {
                let raw = values[sensor.channel];
                let temp_c = match raw == DISCONNECTED_C {
                    true => raw,
                    false => raw + sensor.offset,
                };

                sensor.readings.append(temp_c);

                if let Some(max_temp) = sensor.max_temp.filter(|max| temp_c > *max) {
                    class.flag.declare_unsafe(&format!(
                        "{} read {:.1} C, limit {:.1} C",
                        sensor.name, temp_c, max_temp
                    ));
                }
            }
        }

        self.times.append(at);

        debug!(?values, "thermocouples read");

        CollectOutcome::Recorded
    }

    fn failed(&mut self, e: Error) -> CollectOutcome {
        self.bad_reads += 1;

        warn!("thermocouple read {} failed: {}", self.bad_reads, e);

        if self.bad_reads < MAX_BAD_READS {
            return CollectOutcome::Failed(self.bad_reads);
        }

        self.bad_reads = 0;
        self.restarts += 1;

        match self.restarts {
            n if n <= MAX_SOURCE_RESTARTS => {
                warn!("thermocouple reader stalled, restart {}", n);
                self.source.restart();
                CollectOutcome::Restarted(n)
            }
            n if n == MAX_SOURCE_RESTARTS + 1 => {
                for class in &self.classes {
                    class.flag.declare_unsafe("thermocouple reader not responding");
                }
                CollectOutcome::DeclaredUnsafe
            }
            _ => CollectOutcome::Down,
        }
    }

    #[inline]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
